//! A set of logical configuration files keyed by normalized path.
//!
//! This is the single ingestion boundary: synthesized output and imported
//! machine trees both enter through [`ConfigTree::insert_text`], so every
//! downstream stage sees the same parsed shape.

use crate::model::config_file::{ConfigFile, Provenance, normalize_path};
use crate::parser::{self, ParsedFile};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    files: BTreeMap<String, ParsedFile>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text` and store it under the normalized `path`, replacing any
    /// earlier file at that path.
    pub fn insert_text(&mut self, path: &str, text: &str, provenance: Provenance) {
        let parsed = parser::parse(path, text, provenance);
        self.files.insert(parsed.file.path.clone(), parsed);
    }

    /// Store an already-built file. It carries no syntax issues.
    pub fn insert_file(&mut self, file: ConfigFile) {
        self.files.insert(
            file.path.clone(),
            ParsedFile {
                file,
                issues: Vec::new(),
            },
        );
    }

    /// Tree of generated files (path → text).
    pub fn from_generated<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut tree = Self::new();
        for (path, text) in files {
            tree.insert_text(path, text, Provenance::Generated);
        }
        tree
    }

    /// Tree of files read from an existing machine.
    pub fn from_imported(files: &BTreeMap<String, String>) -> Self {
        let mut tree = Self::new();
        for (path, text) in files {
            tree.insert_text(path, text, Provenance::Imported);
        }
        tree
    }

    pub fn get(&self, path: &str) -> Option<&ParsedFile> {
        self.files.get(&normalize_path(path))
    }

    pub fn file(&self, path: &str) -> Option<&ConfigFile> {
        self.get(path).map(|p| &p.file)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParsedFile)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_normalized() {
        let tree = ConfigTree::from_generated([("./config\\printer.cfg", "[printer]\n")]);
        assert!(tree.contains("config/printer.cfg"));
        assert!(tree.get("./config/printer.cfg").is_some());
        assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["config/printer.cfg"]);
    }

    #[test]
    fn test_imported_provenance() {
        let mut files = BTreeMap::new();
        files.insert("printer.cfg".to_string(), "[printer]\nkinematics: corexy\n".to_string());
        let tree = ConfigTree::from_imported(&files);
        let file = tree.file("printer.cfg").unwrap();
        assert_eq!(file.sections[0].provenance, Provenance::Imported);
    }
}
