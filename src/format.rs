//! Output formatting for findings and reports.

use crate::model::{Severity, ValidationFinding, ValidationReport};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// `file:line: severity [category] message` location prefix.
fn location(finding: &ValidationFinding) -> String {
    match finding.line {
        Some(line) => format!("{}:{}", finding.file, line),
        None => finding.file.clone(),
    }
}

/// One finding per line, compiler style.
pub fn format_finding_text(finding: &ValidationFinding) -> String {
    let allowlisted = if finding.allowlisted { " (allowlisted)" } else { "" };
    format!(
        "{}: {} [{}] {}{}",
        location(finding),
        finding.severity,
        finding.category,
        finding.message,
        allowlisted
    )
}

/// Findings followed by a summary line.
pub fn format_report_text(report: &ValidationReport) -> String {
    let mut out = String::new();
    for finding in &report.findings {
        out.push_str(&format_finding_text(finding));
        out.push('\n');
    }
    out.push_str(&summary_line(report));
    out.push('\n');
    out
}

pub fn summary_line(report: &ValidationReport) -> String {
    format!(
        "{} blocking, {} warning(s), {} info",
        report.blocking_count(),
        report.warning_count(),
        report.count(Severity::Info)
    )
}

/// Findings grouped by file.
pub fn format_report_markdown(report: &ValidationReport) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Findings ({})\n\n", report.len()));

    let mut by_file: BTreeMap<&str, Vec<&ValidationFinding>> = BTreeMap::new();
    for finding in &report.findings {
        by_file.entry(finding.file.as_str()).or_default().push(finding);
    }

    for (file, findings) in by_file {
        md.push_str(&format!("## `{}`\n\n", file));
        for finding in findings {
            let line = finding
                .line
                .map(|l| format!("line {}: ", l))
                .unwrap_or_default();
            let marker = match finding.severity {
                Severity::Blocking => "**blocking**",
                Severity::Warning => "warning",
                Severity::Info => "info",
            };
            md.push_str(&format!(
                "- {} `{}` {}{}\n",
                marker, finding.category, line, finding.message
            ));
        }
        md.push('\n');
    }

    md.push_str(&format!("_{}_\n", summary_line(report)));
    md
}

/// Findings as a JSON array of {severity, category, file, line?, section?,
/// key?, message, allowlisted}.
pub fn report_to_json(report: &ValidationReport) -> Value {
    serde_json::to_value(&report.findings).unwrap_or_else(|_| Value::Array(Vec::new()))
}

pub fn format_report(report: &ValidationReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_report_text(report),
        OutputFormat::Markdown => format_report_markdown(report),
        OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(&report_to_json(report))
                .unwrap_or_else(|_| "[]".to_string());
            text.push('\n');
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn report() -> ValidationReport {
        let mut report = ValidationReport::new();
        report.push(
            ValidationFinding::blocking(Category::Role, "printer.cfg", "[printer] requires 'kinematics'")
                .with_line(3)
                .with_section("printer")
                .with_key("kinematics"),
        );
        report.push(ValidationFinding::warning(Category::Orphan, "old.cfg", "file is not reachable from root 'printer.cfg'"));
        report
    }

    #[test]
    fn test_from_str() {
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("md"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::from_str("yaml"), None);
    }

    #[test]
    fn test_text() {
        let text = format_report_text(&report());
        assert!(text.starts_with("printer.cfg:3: blocking [role] [printer] requires 'kinematics'\n"));
        assert!(text.contains("old.cfg: warning [orphan]"));
        assert!(text.ends_with("1 blocking, 1 warning(s), 0 info\n"));
    }

    #[test]
    fn test_json_shape() {
        let json = report_to_json(&report());
        assert_eq!(json[0]["severity"], "blocking");
        assert_eq!(json[0]["category"], "role");
        assert_eq!(json[0]["line"], 3);
        assert_eq!(json[0]["allowlisted"], false);
        assert!(json[1].get("line").is_none());
        assert_eq!(json[1]["category"], "orphan");
    }

    #[test]
    fn test_markdown_groups_by_file() {
        let md = format_report_markdown(&report());
        assert!(md.find("## `old.cfg`").unwrap() < md.find("## `printer.cfg`").unwrap());
    }
}
