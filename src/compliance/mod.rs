//! Compliance reporting (C8): report generation, risk assessment, and
//! export formatting — §4.8.

pub mod export;
pub mod reporter;

pub use export::{export_report, Compression, ExportConfig, ExportFormat, ExportResult};
pub use reporter::{ComplianceReport, ComplianceReporter, ReportCriteria, ReportType};
