//! Validation findings and reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location label used for findings raised against the attribute model
/// rather than a configuration file.
pub const ATTRIBUTES_LOCATION: &str = "<attributes>";

/// Finding severity. `Info` is only produced by allowlist downgrades and
/// never counts toward the blocking gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Blocking => "blocking",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Syntax,
    DuplicateKey,
    Role,
    NumericRange,
    UnresolvedInclude,
    Cycle,
    Orphan,
    Conflict,
    Resolution,
    Parity,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Syntax => "syntax",
            Category::DuplicateKey => "duplicate-key",
            Category::Role => "role",
            Category::NumericRange => "numeric-range",
            Category::UnresolvedInclude => "unresolved-include",
            Category::Cycle => "cycle",
            Category::Orphan => "orphan",
            Category::Conflict => "conflict",
            Category::Resolution => "resolution",
            Category::Parity => "parity",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub category: Category,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
    #[serde(default)]
    pub allowlisted: bool,
}

impl ValidationFinding {
    pub fn new(
        severity: Severity,
        category: Category,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            file: file.into(),
            line: None,
            section: None,
            key: None,
            message: message.into(),
            allowlisted: false,
        }
    }

    pub fn blocking(category: Category, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Blocking, category, file, message)
    }

    pub fn warning(category: Category, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, file, message)
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Downgrade to informational and mark as allowlisted.
    pub fn allowlist(mut self) -> Self {
        self.severity = Severity::Info;
        self.allowlisted = true;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Ordered collection of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: ValidationFinding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = ValidationFinding>) {
        self.findings.extend(findings);
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn has_blocking(&self) -> bool {
        self.findings.iter().any(ValidationFinding::is_blocking)
    }

    pub fn blocking_count(&self) -> usize {
        self.count(Severity::Blocking)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    /// Sort by (file, line, category). Stable, so findings that tie keep the
    /// order their pass produced them in.
    pub fn sort(&mut self) {
        self.findings.sort_by(|a, b| {
            a.file
                .cmp(&b.file)
                .then_with(|| a.line.unwrap_or(0).cmp(&b.line.unwrap_or(0)))
                .then_with(|| a.category.cmp(&b.category))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_downgrades_to_info() {
        let finding = ValidationFinding::blocking(Category::Conflict, "a.cfg", "differs").allowlist();
        assert_eq!(finding.severity, Severity::Info);
        assert!(finding.allowlisted);
        assert!(!finding.is_blocking());
    }

    #[test]
    fn test_sort_orders_by_file_line_category() {
        let mut report = ValidationReport::new();
        report.push(ValidationFinding::warning(Category::Orphan, "b.cfg", "orphan"));
        report.push(ValidationFinding::blocking(Category::Role, "a.cfg", "role").with_line(7));
        report.push(ValidationFinding::blocking(Category::Syntax, "a.cfg", "syntax").with_line(7));
        report.push(ValidationFinding::blocking(Category::Syntax, "a.cfg", "early").with_line(2));
        report.sort();

        let order: Vec<&str> = report.findings.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(order, vec!["early", "syntax", "role", "orphan"]);
    }

    #[test]
    fn test_export_shape() {
        let finding = ValidationFinding::blocking(Category::DuplicateKey, "printer.cfg", "dup")
            .with_section("printer")
            .with_key("max_accel");
        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["severity"], "blocking");
        assert_eq!(value["category"], "duplicate-key");
        assert_eq!(value["section"], "printer");
        assert_eq!(value["allowlisted"], false);
        assert!(value.get("line").is_none());
    }

    #[test]
    fn test_counts() {
        let mut report = ValidationReport::new();
        report.push(ValidationFinding::blocking(Category::Cycle, "a.cfg", "x"));
        report.push(ValidationFinding::warning(Category::Orphan, "b.cfg", "y"));
        report.push(ValidationFinding::blocking(Category::Conflict, "c.cfg", "z").allowlist());
        assert_eq!(report.blocking_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.count(Severity::Info), 1);
        assert!(report.has_blocking());
    }
}
