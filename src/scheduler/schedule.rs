use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub frequency: Frequency,
    /// `HH:MM`, local to `timezone`.
    pub time: String,
    pub timezone: String,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
}

fn parse_time(time: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|e| AuditError::Validation(format!("invalid schedule time '{time}': {e}")))
}

/// `dayOfWeek` uses the common 0=Sunday..6=Saturday convention (S6 treats
/// `1` as Monday).
fn weekday_number(w: chrono::Weekday) -> u32 {
    match w {
        chrono::Weekday::Sun => 0,
        chrono::Weekday::Mon => 1,
        chrono::Weekday::Tue => 2,
        chrono::Weekday::Wed => 3,
        chrono::Weekday::Thu => 4,
        chrono::Weekday::Fri => 5,
        chrono::Weekday::Sat => 6,
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    (first_of_next - Duration::days(1)).day()
}

/// Computes the next run per §4.10: only UTC is actually supported as a
/// `timezone` value today (non-UTC zones are accepted in config but treated
/// as UTC); this is a narrowing versus a full IANA-timezone implementation,
/// recorded as a known limitation rather than guessed at.
pub fn calculate_next_run(schedule: &Schedule, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let time = parse_time(&schedule.time)?;
    let today_at_time = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(Utc)
        .single()
        .ok_or_else(|| AuditError::Internal("ambiguous local time".to_string()))?;

    match schedule.frequency {
        Frequency::Daily => {
            if today_at_time > now {
                Ok(today_at_time)
            } else {
                Ok(today_at_time + Duration::days(1))
            }
        }
        Frequency::Weekly => {
            let target_weekday = schedule
                .day_of_week
                .ok_or_else(|| AuditError::Validation("weekly schedule requires dayOfWeek".to_string()))?;
            let mut candidate = if today_at_time > now { today_at_time } else { today_at_time + Duration::days(1) };
            loop {
                if weekday_number(candidate.weekday()) == target_weekday && candidate > now {
                    return Ok(candidate);
                }
                candidate += Duration::days(1);
            }
        }
        Frequency::Monthly => next_monthly(schedule, now, time, 1),
        Frequency::Quarterly => next_monthly(schedule, now, time, 3),
    }
}

fn next_monthly(schedule: &Schedule, now: DateTime<Utc>, time: NaiveTime, month_step: u32) -> Result<DateTime<Utc>> {
    let day_of_month = schedule
        .day_of_month
        .ok_or_else(|| AuditError::Validation("monthly/quarterly schedule requires dayOfMonth".to_string()))?;

    let mut year = now.year();
    let mut month = now.month();
    for _ in 0..24 {
        let clamped_day = day_of_month.min(last_day_of_month(year, month));
        let candidate = chrono::NaiveDate::from_ymd_opt(year, month, clamped_day)
            .unwrap()
            .and_time(time)
            .and_local_timezone(Utc)
            .single()
            .ok_or_else(|| AuditError::Internal("ambiguous local time".to_string()))?;
        if candidate > now {
            return Ok(candidate);
        }
        month += month_step;
        while month > 12 {
            month -= 12;
            year += 1;
        }
    }
    Err(AuditError::Internal("could not resolve next run within 24 steps".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_always_strictly_future() {
        // P7.
        let schedules = [
            Schedule { frequency: Frequency::Daily, time: "00:00".to_string(), timezone: "UTC".to_string(), day_of_week: None, day_of_month: None },
            Schedule { frequency: Frequency::Weekly, time: "09:00".to_string(), timezone: "UTC".to_string(), day_of_week: Some(1), day_of_month: None },
            Schedule { frequency: Frequency::Monthly, time: "09:00".to_string(), timezone: "UTC".to_string(), day_of_week: None, day_of_month: Some(31) },
            Schedule { frequency: Frequency::Quarterly, time: "09:00".to_string(), timezone: "UTC".to_string(), day_of_week: None, day_of_month: Some(1) },
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        for schedule in &schedules {
            let next = calculate_next_run(schedule, now).unwrap();
            assert!(next > now, "{:?} produced non-future next run {}", schedule.frequency, next);
        }
    }

    #[test]
    fn weekly_monday_from_wednesday() {
        // S6.
        let schedule = Schedule { frequency: Frequency::Weekly, time: "09:00".to_string(), timezone: "UTC".to_string(), day_of_week: Some(1), day_of_month: None };
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        let next = calculate_next_run(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let schedule = Schedule { frequency: Frequency::Monthly, time: "09:00".to_string(), timezone: "UTC".to_string(), day_of_week: None, day_of_month: Some(31) };
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let next = calculate_next_run(&schedule, now).unwrap();
        // April has 30 days; clamp to the 30th.
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap());
    }
}
