//! Include graph construction.
//!
//! Every `[include …]` directive in a [`ConfigTree`] becomes an
//! [`IncludeEdge`]. Targets are resolved relative to the including file's
//! directory; a pattern may carry one `*` wildcard that matches within a
//! single path segment. A depth-first walk from the root then yields the
//! flatten order and the files the root never reaches. Every elementary
//! include cycle among the reachable files is reported once, starting from
//! its smallest member.

use crate::cancel::{Cancelled, CancellationToken};
use crate::model::{Category, ConfigTree, ValidationFinding, normalize_path, resolve_relative};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One include directive and what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeEdge {
    pub from: String,
    /// Pattern as written in the directive.
    pub pattern: String,
    pub line: usize,
    /// Resolved target paths, sorted.
    pub targets: Vec<String>,
    pub wildcard: bool,
    pub unresolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    /// Report files not reachable from the root.
    pub orphan_warnings: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            orphan_warnings: true,
        }
    }
}

/// Resolved include graph of a tree.
#[derive(Debug, Clone, Default)]
pub struct IncludeGraph {
    root: String,
    edges: Vec<IncludeEdge>,
    /// Preorder of the depth-first walk from the root.
    order: Vec<String>,
    findings: Vec<ValidationFinding>,
}

impl IncludeGraph {
    /// Resolve `tree`'s includes and walk it from `root`.
    pub fn build(
        tree: &ConfigTree,
        root: &str,
        options: GraphOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, Cancelled> {
        let root = normalize_path(root);
        let mut graph = IncludeGraph {
            root: root.clone(),
            ..Default::default()
        };

        for (path, parsed) in tree.iter() {
            cancel.check()?;
            for (pattern, line) in parsed.file.include_directives() {
                let edge = graph.resolve_edge(tree, path, pattern, line);
                debug!(
                    from = path,
                    pattern,
                    targets = edge.targets.len(),
                    "Resolved include"
                );
                graph.edges.push(edge);
            }
        }

        if !tree.contains(&root) {
            graph.findings.push(ValidationFinding::blocking(
                Category::UnresolvedInclude,
                root.as_str(),
                format!("root file '{}' is not in the configuration tree", root),
            ));
            return Ok(graph);
        }

        let mut walk = Walk {
            graph: &graph,
            cancel,
            visited: BTreeSet::new(),
            order: Vec::new(),
        };
        walk.visit(&root)?;
        let Walk { visited, order, .. } = walk;
        let cycles = CycleSearch::run(&graph, &visited, cancel)?;
        graph.findings.extend(cycles);
        graph.order = order;

        if options.orphan_warnings {
            for path in tree.paths().filter(|p| !visited.contains(*p)) {
                graph.findings.push(ValidationFinding::warning(
                    Category::Orphan,
                    path,
                    format!("file is not reachable from root '{}'", root),
                ));
            }
        }

        Ok(graph)
    }

    fn resolve_edge(&mut self, tree: &ConfigTree, from: &str, pattern: &str, line: usize) -> IncludeEdge {
        let resolved = resolve_relative(from, pattern);
        let stars = resolved.matches('*').count();
        let mut edge = IncludeEdge {
            from: from.to_string(),
            pattern: pattern.to_string(),
            line,
            targets: Vec::new(),
            wildcard: stars > 0,
            unresolved: false,
        };

        if stars > 1 {
            edge.unresolved = true;
            self.findings.push(
                ValidationFinding::blocking(
                    Category::Syntax,
                    from,
                    format!("include '{}' has more than one wildcard", pattern),
                )
                .with_line(line),
            );
            return edge;
        }

        if stars == 1 {
            edge.targets = tree
                .paths()
                .filter(|candidate| wildcard_matches(&resolved, candidate))
                .map(str::to_string)
                .collect();
            if edge.targets.is_empty() {
                edge.unresolved = true;
                self.findings.push(
                    ValidationFinding::warning(
                        Category::UnresolvedInclude,
                        from,
                        format!("include '{}' matches no files", pattern),
                    )
                    .with_line(line),
                );
            }
        } else if tree.contains(&resolved) {
            edge.targets.push(resolved);
        } else {
            edge.unresolved = true;
            self.findings.push(
                ValidationFinding::blocking(
                    Category::UnresolvedInclude,
                    from,
                    format!("include '{}' does not resolve to a file ({})", pattern, resolved),
                )
                .with_line(line),
            );
        }
        edge.targets.sort();
        edge
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn edges(&self) -> &[IncludeEdge] {
        &self.edges
    }

    /// Files reachable from the root, in depth-first preorder.
    pub fn flatten(&self) -> &[String] {
        &self.order
    }

    pub fn findings(&self) -> &[ValidationFinding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<ValidationFinding> {
        self.findings
    }

    /// Whether any literal include failed to resolve (or the root is absent).
    pub fn has_blocking_unresolved(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.category == Category::UnresolvedInclude && f.is_blocking())
    }

    /// File → ordered include targets, in the shape a project records.
    pub fn recorded(&self) -> BTreeMap<String, Vec<String>> {
        let mut recorded: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in &self.edges {
            let targets = recorded.entry(edge.from.clone()).or_default();
            for target in &edge.targets {
                if !targets.contains(target) {
                    targets.push(target.clone());
                }
            }
        }
        recorded
    }

    fn targets_of<'a>(&'a self, from: &'a str) -> impl Iterator<Item = (&'a IncludeEdge, &'a String)> {
        self.edges
            .iter()
            .filter(move |e| e.from == from)
            .flat_map(|e| e.targets.iter().map(move |t| (e, t)))
    }
}

struct Walk<'a> {
    graph: &'a IncludeGraph,
    cancel: &'a CancellationToken,
    visited: BTreeSet<String>,
    order: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, node: &str) -> Result<(), Cancelled> {
        self.cancel.check()?;
        self.visited.insert(node.to_string());
        self.order.push(node.to_string());

        let graph = self.graph;
        for (_, target) in graph.targets_of(node) {
            if !self.visited.contains(target) {
                self.visit(target)?;
            }
        }
        Ok(())
    }
}

/// Elementary cycle enumeration. Each cycle is found only from its smallest
/// member, so a search from `start` never enters a node ordered before it.
struct CycleSearch<'a> {
    graph: &'a IncludeGraph,
    cancel: &'a CancellationToken,
    path: Vec<&'a str>,
    seen: BTreeSet<Vec<&'a str>>,
    findings: Vec<ValidationFinding>,
}

impl<'a> CycleSearch<'a> {
    fn run(
        graph: &'a IncludeGraph,
        nodes: &'a BTreeSet<String>,
        cancel: &'a CancellationToken,
    ) -> Result<Vec<ValidationFinding>, Cancelled> {
        let mut search = CycleSearch {
            graph,
            cancel,
            path: Vec::new(),
            seen: BTreeSet::new(),
            findings: Vec::new(),
        };
        for start in nodes {
            search.path.push(start.as_str());
            search.extend(start, start)?;
            search.path.clear();
        }
        if !search.findings.is_empty() {
            debug!(cycles = search.findings.len(), "include cycles found");
        }
        Ok(search.findings)
    }

    fn extend(&mut self, start: &'a str, node: &'a str) -> Result<(), Cancelled> {
        self.cancel.check()?;
        let graph = self.graph;
        for (edge, target) in graph.targets_of(node) {
            let target = target.as_str();
            if target == start {
                self.close(edge);
            } else if target > start && !self.path.contains(&target) {
                self.path.push(target);
                self.extend(start, target)?;
                self.path.pop();
            }
        }
        Ok(())
    }

    fn close(&mut self, edge: &IncludeEdge) {
        if !self.seen.insert(self.path.clone()) {
            return;
        }
        let mut members = self.path.clone();
        members.push(self.path[0]);
        self.findings.push(
            ValidationFinding::blocking(
                Category::Cycle,
                edge.from.as_str(),
                format!("include cycle: {}", members.join(" -> ")),
            )
            .with_line(edge.line),
        );
    }
}

/// Match a single-wildcard pattern against a path. The `*` never crosses a
/// `/`.
pub fn wildcard_matches(pattern: &str, candidate: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let candidate_segments: Vec<&str> = candidate.split('/').collect();
    if pattern_segments.len() != candidate_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(&candidate_segments)
        .all(|(p, c)| match p.split_once('*') {
            Some((prefix, suffix)) => {
                c.len() >= prefix.len() + suffix.len() && c.starts_with(prefix) && c.ends_with(suffix)
            }
            None => p == c,
        })
}

/// Depth-first preorder of a recorded include graph from `root`. Targets
/// that are not keys are still visited as leaves.
pub fn flatten_recorded(graph: &BTreeMap<String, Vec<String>>, root: &str) -> Vec<String> {
    fn visit(
        graph: &BTreeMap<String, Vec<String>>,
        node: &str,
        seen: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) {
        if !seen.insert(node.to_string()) {
            return;
        }
        order.push(node.to_string());
        for child in graph.get(node).into_iter().flatten() {
            visit(graph, &normalize_path(child), seen, order);
        }
    }

    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    visit(graph, &normalize_path(root), &mut seen, &mut order);
    order
}
