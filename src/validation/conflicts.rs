//! Cross-occurrence conflict classification.
//!
//! A section name may appear in several files (or several times in one
//! file); Klipper merges them, last value wins. A key whose normalized value
//! differs between occurrences is a conflict. Allowlisted keys that every
//! occurrence defines are expected to diverge and are downgraded to `Info`.

use super::rules::MergedSection;
use crate::model::{Category, ValidationFinding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Keys allowed to diverge across occurrences. Matching is case-insensitive
/// and exact on the key name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    allowlist: BTreeSet<String>,
}

impl ConflictPolicy {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowlist: keys
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_allowlisted(&self, key: &str) -> bool {
        self.allowlist.contains(&key.trim().to_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.allowlist.iter().map(String::as_str)
    }
}

/// One place a key was defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySite {
    pub file: String,
    pub line: usize,
    pub value: String,
}

/// A key with more than one distinct value across the occurrences of a
/// section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDivergence {
    pub section: String,
    pub key: String,
    pub sites: Vec<KeySite>,
    /// Whether every occurrence of the section defines the key.
    pub in_every_occurrence: bool,
}

impl KeyDivergence {
    /// First site whose value differs from the first site's.
    fn diverging_site(&self) -> Option<&KeySite> {
        let first = self.sites.first()?;
        self.sites.iter().find(|s| s.value != first.value)
    }

    pub fn to_finding(&self, policy: &ConflictPolicy) -> ValidationFinding {
        let site = self.diverging_site().or(self.sites.first());
        let (file, line) = site
            .map(|s| (s.file.as_str(), s.line))
            .unwrap_or_default();
        let listing: Vec<String> = self
            .sites
            .iter()
            .map(|s| format!("{}:{} = {}", s.file, s.line, s.value.replace('\n', " ")))
            .collect();
        let finding = ValidationFinding::blocking(
            Category::Conflict,
            file,
            format!(
                "[{}] {} differs between occurrences: {}",
                self.section,
                self.key,
                listing.join("; ")
            ),
        )
        .with_line(line)
        .with_section(self.section.clone())
        .with_key(self.key.clone());

        if self.in_every_occurrence && policy.is_allowlisted(&self.key) {
            finding.allowlist()
        } else {
            finding
        }
    }
}

/// Divergent keys of every multiply-defined section.
pub fn divergences(merged: &[MergedSection<'_>]) -> Vec<KeyDivergence> {
    let mut out = Vec::new();
    for section in merged.iter().filter(|s| s.occurrences.len() > 1) {
        let mut keys: Vec<String> = Vec::new();
        for (_, occurrence) in &section.occurrences {
            for entry in &occurrence.entries {
                let key = entry.normalized_key();
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        for key in keys {
            let mut sites = Vec::new();
            let mut present = 0;
            for (file, occurrence) in &section.occurrences {
                if let Some(entry) = occurrence.get(&key) {
                    present += 1;
                    sites.push(KeySite {
                        file: file.to_string(),
                        line: entry.line,
                        value: entry.comparable_value(),
                    });
                }
            }
            let distinct: BTreeSet<&str> = sites.iter().map(|s| s.value.as_str()).collect();
            if distinct.len() > 1 {
                out.push(KeyDivergence {
                    section: section.id.clone(),
                    key,
                    sites,
                    in_every_occurrence: present == section.occurrences.len(),
                });
            }
        }
    }
    out
}

/// Conflict pass.
pub fn classify(merged: &[MergedSection<'_>], policy: &ConflictPolicy) -> Vec<ValidationFinding> {
    divergences(merged)
        .iter()
        .map(|d| d.to_finding(policy))
        .collect()
}
