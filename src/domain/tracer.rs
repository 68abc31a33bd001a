//! Call-path tracing over the symbol database.
//!
//! Bounded, cycle-safe searches over the caller/callee relations, plus the
//! reduction of a raw path set to its unique (non-subsumed) chains. All
//! traversals use explicit stacks so a deep depth bound cannot exhaust the
//! native call stack, and so the searches stay plain `async fn`s.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::domain::call_path::CallPath;
use crate::domain::call_site::CallSite;
use crate::ports::{QueryResult, SymbolQuery};

const DEFAULT_MAX_DEPTH: usize = 10;

/// Which end of a chain a truncated duplicate shares with a longer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDirection {
    /// Caller chains share their tail: a truncation is a suffix.
    Caller,
    /// Callee chains share their head: a truncation is a prefix.
    Callee,
}

/// Optional function/directory filters applied to every recorded path.
///
/// Directory exclusion is a substring test against the function's resolved
/// definition path, not a path-segment match: excluding `net` also excludes
/// anything under `internet/`.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    pub functions: HashSet<String>,
    pub directories: HashSet<String>,
}

impl PathFilter {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.directories.is_empty()
    }
}

/// Caller/callee adjacency captured by one `build_call_graph` run.
/// Safe for concurrent reads; discarded with the run that produced it.
#[derive(Debug, Default)]
pub struct CallGraph {
    callers: DashMap<String, Vec<CallSite>>,
    callees: DashMap<String, Vec<CallSite>>,
}

impl CallGraph {
    pub fn callers_of(&self, function: &str) -> Vec<CallSite> {
        self.callers.get(function).map(|r| r.clone()).unwrap_or_default()
    }

    pub fn callees_of(&self, function: &str) -> Vec<CallSite> {
        self.callees.get(function).map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of functions visited while building the graph.
    pub fn len(&self) -> usize {
        self.callees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callees.is_empty()
    }
}

/// Raw versus distinct-name call counts for a single function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallStatistics {
    pub caller_count: usize,
    pub callee_count: usize,
    pub unique_callers: usize,
    pub unique_callees: usize,
}

/// Traces function call chains using symbol database queries.
pub struct CallTracer {
    symbols: Arc<dyn SymbolQuery>,
    max_depth: usize,
    callback_search: bool,
}

// DFS frame for the caller/callee traces: one entered node with its fetched
// neighbors and a cursor into them.
struct TraceFrame {
    function: String,
    neighbors: Vec<CallSite>,
    next: usize,
}

// One pending branch of the two-point path search. Each branch owns its path
// and visited set, so sibling branches cannot interfere.
struct Branch {
    function: String,
    path: Vec<String>,
    visited: HashSet<String>,
}

impl CallTracer {
    pub fn new(symbols: Arc<dyn SymbolQuery>) -> Self {
        Self {
            symbols,
            max_depth: DEFAULT_MAX_DEPTH,
            callback_search: true,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_callback_search(mut self, enabled: bool) -> Self {
        self.callback_search = enabled;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Trace all caller paths to `target`, outermost caller first.
    ///
    /// Every visited function records the chain found so far, so the result
    /// contains each partial chain as well as the full ones; the unique-chain
    /// reduction removes the truncations.
    pub async fn trace_callers(
        &self,
        target: &str,
        max_depth: Option<usize>,
        filter: &PathFilter,
    ) -> QueryResult<Vec<CallPath>> {
        let paths = self
            .trace_paths(target, max_depth, filter, ChainDirection::Caller)
            .await?;
        debug!(function = target, paths = paths.len(), "caller trace complete");
        Ok(paths)
    }

    /// Trace all callee paths from `source`; index 0 of each path is `source`.
    pub async fn trace_callees(
        &self,
        source: &str,
        max_depth: Option<usize>,
        filter: &PathFilter,
    ) -> QueryResult<Vec<CallPath>> {
        let paths = self
            .trace_paths(source, max_depth, filter, ChainDirection::Callee)
            .await?;
        debug!(source, paths = paths.len(), "callee trace complete");
        Ok(paths)
    }

    // Shared DFS for both directions. A single visited set guards the current
    // branch: a function is added on entry and removed on exit, so it may
    // appear on many independent paths but never twice on one.
    async fn trace_paths(
        &self,
        root: &str,
        max_depth: Option<usize>,
        filter: &PathFilter,
        direction: ChainDirection,
    ) -> QueryResult<Vec<CallPath>> {
        let max_depth = max_depth.unwrap_or(self.max_depth);
        let mut paths = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut trail: Vec<String> = Vec::new();
        let mut stack: Vec<TraceFrame> = Vec::new();

        let neighbors = self.neighbors(root, direction).await?;
        self.record_path(&mut trail, root, direction, filter, &mut paths)
            .await;
        visited.insert(root.to_string());
        stack.push(TraceFrame {
            function: root.to_string(),
            neighbors,
            next: 0,
        });

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.neighbors.len() {
                visited.remove(&frame.function);
                trail.pop();
                stack.pop();
                continue;
            }
            let next = frame.neighbors[frame.next].function.clone();
            frame.next += 1;

            // trail.len() is the depth the neighbor would be entered at.
            if trail.len() > max_depth || visited.contains(&next) {
                continue;
            }

            let neighbors = self.neighbors(&next, direction).await?;
            self.record_path(&mut trail, &next, direction, filter, &mut paths)
                .await;
            visited.insert(next.clone());
            stack.push(TraceFrame {
                function: next,
                neighbors,
                next: 0,
            });
        }

        Ok(paths)
    }

    async fn neighbors(
        &self,
        function: &str,
        direction: ChainDirection,
    ) -> QueryResult<Vec<CallSite>> {
        match direction {
            ChainDirection::Caller if self.callback_search => {
                self.symbols.callback_callers(function).await
            }
            ChainDirection::Caller => self.symbols.functions_calling(function).await,
            ChainDirection::Callee => self.symbols.functions_called_by(function).await,
        }
    }

    // Push `function` onto the trail and record the resulting chain, caller
    // chains reversed so index 0 is the outermost caller.
    async fn record_path(
        &self,
        trail: &mut Vec<String>,
        function: &str,
        direction: ChainDirection,
        filter: &PathFilter,
        paths: &mut Vec<CallPath>,
    ) {
        trail.push(function.to_string());
        let chain: Vec<String> = match direction {
            ChainDirection::Caller => trail.iter().rev().cloned().collect(),
            ChainDirection::Callee => trail.clone(),
        };
        if !self.should_exclude_path(&chain, filter).await {
            paths.push(CallPath::new(chain));
        }
    }

    /// Find every path from `from` to `to` over the callee relation.
    ///
    /// Each branch carries its own visited set, value-copied per frame, so
    /// the same function may be revisited on a different branch but never
    /// twice on one. Paths are not extended past the target.
    pub async fn find_call_paths(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<usize>,
    ) -> QueryResult<Vec<CallPath>> {
        let max_depth = max_depth.unwrap_or(self.max_depth);
        let mut paths = Vec::new();
        let mut stack = vec![Branch {
            function: from.to_string(),
            path: Vec::new(),
            visited: HashSet::new(),
        }];

        while let Some(Branch {
            function,
            mut path,
            mut visited,
        }) = stack.pop()
        {
            if path.len() > max_depth {
                continue;
            }
            if function == to {
                path.push(function);
                paths.push(CallPath::new(path));
                continue;
            }
            if visited.contains(&function) {
                continue;
            }

            let callees = self.symbols.functions_called_by(&function).await?;
            visited.insert(function.clone());
            path.push(function);
            // Reverse push keeps branch exploration in call-site order.
            for callee in callees.iter().rev() {
                stack.push(Branch {
                    function: callee.function.clone(),
                    path: path.clone(),
                    visited: visited.clone(),
                });
            }
        }

        debug!(from, to, paths = paths.len(), "two-point path search complete");
        Ok(paths)
    }

    /// Minimum distance in call edges from any root, over the callee relation.
    pub async fn function_depth_map(
        &self,
        roots: &[String],
    ) -> QueryResult<HashMap<String, usize>> {
        let mut depth_map: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> =
            roots.iter().map(|root| (root.clone(), 0)).collect();

        while let Some((function, depth)) = queue.pop_front() {
            if depth_map.get(&function).is_some_and(|&known| known <= depth) {
                continue;
            }
            depth_map.insert(function.clone(), depth);

            for callee in self.symbols.functions_called_by(&function).await? {
                queue.push_back((callee.function, depth + 1));
            }
        }

        Ok(depth_map)
    }

    /// Raw and distinct-name caller/callee counts from one query each way.
    pub async fn call_statistics(&self, function: &str) -> QueryResult<CallStatistics> {
        let callers = self.symbols.functions_calling(function).await?;
        let callees = self.symbols.functions_called_by(function).await?;

        let unique_callers = callers
            .iter()
            .map(|site| site.function.as_str())
            .collect::<HashSet<_>>()
            .len();
        let unique_callees = callees
            .iter()
            .map(|site| site.function.as_str())
            .collect::<HashSet<_>>()
            .len();

        Ok(CallStatistics {
            caller_count: callers.len(),
            callee_count: callees.len(),
            unique_callers,
            unique_callees,
        })
    }

    /// Unique, complete caller chains to `target`: the full trace with every
    /// duplicate and strict suffix truncation removed.
    pub async fn unique_call_chains(
        &self,
        target: &str,
        max_depth: Option<usize>,
        filter: &PathFilter,
    ) -> QueryResult<Vec<CallPath>> {
        let all = self.trace_callers(target, max_depth, filter).await?;
        Ok(reduce_unique_chains(all, ChainDirection::Caller))
    }

    /// Unique, complete callee chains from `source` (prefix truncations
    /// removed).
    pub async fn unique_callee_chains(
        &self,
        source: &str,
        max_depth: Option<usize>,
        filter: &PathFilter,
    ) -> QueryResult<Vec<CallPath>> {
        let all = self.trace_callees(source, max_depth, filter).await?;
        Ok(reduce_unique_chains(all, ChainDirection::Callee))
    }

    /// Snapshot the caller/callee adjacency reachable from `roots` (both
    /// relations, breadth-first).
    pub async fn build_call_graph(&self, roots: &[String]) -> QueryResult<CallGraph> {
        let graph = CallGraph::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();

        while let Some(function) = queue.pop_front() {
            if !visited.insert(function.clone()) {
                continue;
            }

            let callees = self.symbols.functions_called_by(&function).await?;
            let callers = self.symbols.functions_calling(&function).await?;

            for site in callees.iter().chain(callers.iter()) {
                if !visited.contains(&site.function) {
                    queue.push_back(site.function.clone());
                }
            }

            graph.callees.insert(function.clone(), callees);
            graph.callers.insert(function, callers);
        }

        debug!(functions = graph.len(), "call graph built");
        Ok(graph)
    }

    // A path is excluded if it contains a filtered function, or a function
    // whose resolved definition file contains a filtered directory substring.
    async fn should_exclude_path(&self, path: &[String], filter: &PathFilter) -> bool {
        if !filter.functions.is_empty()
            && path.iter().any(|function| filter.functions.contains(function))
        {
            return true;
        }

        if !filter.directories.is_empty() {
            for function in path {
                let Some(definition) = self.symbols.find_function_definition(function).await
                else {
                    continue;
                };
                if definition.file.is_empty() {
                    continue;
                }
                if filter
                    .directories
                    .iter()
                    .any(|dir| definition.file.contains(dir.as_str()))
                {
                    return true;
                }
            }
        }

        false
    }
}

/// Collapse a raw path set to its unique chains.
///
/// Exact duplicates are dropped first; then, scanning longest-first, a path
/// survives only if no strictly longer survivor has it as a suffix (caller
/// chains) or prefix (callee chains). Output is sorted by (length, first
/// function name) for deterministic presentation.
pub fn reduce_unique_chains(paths: Vec<CallPath>, direction: ChainDirection) -> Vec<CallPath> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates: Vec<CallPath> = Vec::new();
    for path in paths {
        if seen.insert(path.functions.join(" -> ")) {
            candidates.push(path);
        }
    }

    candidates.sort_by(|a, b| b.functions.len().cmp(&a.functions.len()));

    let mut unique: Vec<CallPath> = Vec::new();
    for path in candidates {
        let subsumed = unique.iter().any(|kept| {
            kept.functions.len() > path.functions.len()
                && match direction {
                    ChainDirection::Caller => kept.functions.ends_with(&path.functions),
                    ChainDirection::Callee => kept.functions.starts_with(&path.functions),
                }
        });
        if !subsumed {
            unique.push(path);
        }
    }

    unique.sort_by(|a, b| {
        (a.functions.len(), a.functions.first()).cmp(&(b.functions.len(), b.functions.first()))
    });
    unique
}
