//! Presentation tree for call paths.
//!
//! Pure helpers: merge a set of paths into a nested tree keyed by function
//! name, and render that tree as indented ASCII-art lines. Consumed by the
//! CLI layer; no queries happen here.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::call_path::CallPath;

/// One node of the merged tree. `BTreeMap` children keep siblings sorted.
#[derive(Debug, Default, Serialize)]
pub struct CallTreeNode {
    pub children: BTreeMap<String, CallTreeNode>,
    /// True only while no path extends past this node.
    pub is_leaf: bool,
    /// Position of the node within its paths (0 = chain root).
    pub depth: usize,
}

pub type CallTree = BTreeMap<String, CallTreeNode>;

/// Merge call paths into a nested tree keyed by function name.
pub fn build_call_tree(paths: &[CallPath]) -> CallTree {
    let mut root = CallTree::new();

    for path in paths {
        let mut current = &mut root;
        let last = path.functions.len().saturating_sub(1);

        for (i, function) in path.functions.iter().enumerate() {
            let node = current
                .entry(function.clone())
                .or_insert_with(|| CallTreeNode {
                    children: BTreeMap::new(),
                    is_leaf: i == last,
                    depth: i,
                });
            if i < last {
                node.is_leaf = false;
            }
            current = &mut node.children;
        }
    }

    root
}

/// Render the tree as indented lines with `└──`/`├──` connectors.
pub fn format_tree(tree: &CallTree) -> Vec<String> {
    let mut lines = Vec::new();
    format_level(tree, "", &mut lines);
    lines
}

fn format_level(tree: &CallTree, prefix: &str, lines: &mut Vec<String>) {
    let count = tree.len();

    for (i, (function, node)) in tree.iter().enumerate() {
        let is_last = i + 1 == count;
        let (connector, child_prefix) = if prefix.is_empty() {
            // Root level gets no connector; its children indent one step.
            ("", "    ".to_string())
        } else if is_last {
            ("└── ", format!("{prefix}    "))
        } else {
            ("├── ", format!("{prefix}│   "))
        };

        lines.push(format!("{prefix}{connector}{function}"));

        if !node.children.is_empty() {
            format_level(&node.children, &child_prefix, lines);
        }
    }
}
