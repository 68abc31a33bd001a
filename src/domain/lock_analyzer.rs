//! Lock-context analysis along call chains.
//!
//! For each caller chain to a target function, simulates which locks are
//! held at the moment the target is invoked: acquires add to the held set,
//! releases of the same name remove, and the direct caller's operations are
//! restricted to those textually before its call into the target.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::call_path::CallPath;
use crate::domain::lock_patterns::{
    identify_lock_operations, lock_matches_target, LockAction, LockOperation,
};
use crate::domain::tracer::{CallTracer, PathFilter};
use crate::ports::{QueryResult, SymbolQuery};

/// Simulated lock state at the point the last function of `call_path` is
/// invoked. Recomputed for every analysis; never cached across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockContext {
    pub function: String,
    pub held_locks: BTreeSet<String>,
    pub call_path: Vec<String>,
    /// Every operation seen in the calling frames, unfiltered, for display.
    pub lock_operations: Vec<LockOperation>,
}

/// Aggregate lock usage over all unique caller chains of one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSummary {
    pub function: String,
    pub total_call_paths: usize,
    pub protected_paths: usize,
    pub unprotected_paths: usize,
    pub locks_encountered: Vec<String>,
    pub lock_count: usize,
}

/// Analyzes lock contexts in function call paths.
pub struct LockAnalyzer {
    symbols: Arc<dyn SymbolQuery>,
    tracer: Arc<CallTracer>,
}

impl LockAnalyzer {
    pub fn new(symbols: Arc<dyn SymbolQuery>, tracer: Arc<CallTracer>) -> Self {
        Self { symbols, tracer }
    }

    /// Classify every callee site of `function` against the lock rule table.
    pub async fn find_lock_operations(&self, function: &str) -> QueryResult<Vec<LockOperation>> {
        let calls = self.symbols.functions_called_by(function).await?;
        Ok(calls
            .iter()
            .flat_map(|site| identify_lock_operations(site, function))
            .collect())
    }

    // Restrict `operations` to those before the line where `caller` invokes
    // `target`. If the call site cannot be located, keep everything.
    async fn operations_before_call(
        &self,
        caller: &str,
        target: &str,
        operations: Vec<LockOperation>,
    ) -> QueryResult<Vec<LockOperation>> {
        let calls = self.symbols.functions_called_by(caller).await?;
        let Some(call_line) = calls
            .iter()
            .find(|site| site.function == target)
            .map(|site| site.line)
        else {
            return Ok(operations);
        };

        Ok(operations
            .into_iter()
            .filter(|op| op.line < call_line)
            .collect())
    }

    /// Simulate the held-lock state along one caller chain.
    ///
    /// Only the calling frames are scanned; the final function cannot protect
    /// its own invocation. When no target filter is given and nothing is left
    /// held, protection evidence (locks demonstrably taken around the call,
    /// even if released again) stands in for the held set; a filtered query
    /// reports only locks literally held. That asymmetry is intentional.
    pub async fn analyze_path_locks(
        &self,
        path: &CallPath,
        target_locks: Option<&[String]>,
    ) -> QueryResult<LockContext> {
        let target_locks = target_locks.filter(|locks| !locks.is_empty());

        let mut held: BTreeSet<String> = BTreeSet::new();
        let mut evidence: BTreeSet<String> = BTreeSet::new();
        let mut all_operations: Vec<LockOperation> = Vec::new();

        let calling_frames: &[String] = if path.functions.len() > 1 {
            &path.functions[..path.functions.len() - 1]
        } else {
            &[]
        };

        for (i, function) in calling_frames.iter().enumerate() {
            let operations = self.find_lock_operations(function).await?;
            let display_operations = operations.clone();

            let tracked = if i + 1 == calling_frames.len() {
                // Direct caller: operations after the call site cannot protect it.
                let target = &path.functions[path.functions.len() - 1];
                self.operations_before_call(function, target, operations)
                    .await?
            } else {
                operations
            };

            let mut acquired_here: BTreeSet<String> = BTreeSet::new();
            let mut released_here: BTreeSet<String> = BTreeSet::new();

            for op in &tracked {
                let matches = target_locks
                    .map_or(true, |targets| lock_matches_target(&op.lock_name, targets));
                if !matches {
                    continue;
                }

                match op.action {
                    LockAction::Acquire => {
                        held.insert(op.lock_name.clone());
                        acquired_here.insert(op.lock_name.clone());
                        evidence.insert(op.lock_name.clone());
                    }
                    LockAction::Release => {
                        held.remove(&op.lock_name);
                        released_here.insert(op.lock_name.clone());
                    }
                }
            }

            all_operations.extend(display_operations);

            // A frame that both takes and drops a lock still brackets the
            // call it makes in between; keep it as protection evidence.
            for lock in acquired_here.intersection(&released_here) {
                evidence.insert(lock.clone());
            }
        }

        if held.is_empty() && !evidence.is_empty() && target_locks.is_none() {
            held = evidence;
        }

        Ok(LockContext {
            function: path.functions.last().cloned().unwrap_or_default(),
            held_locks: held,
            call_path: path.functions.clone(),
            lock_operations: all_operations,
        })
    }

    /// Analyze lock state on every caller chain of `target` (unique chains by
    /// default, all traced paths when `unique_only` is false).
    pub async fn analyze_lock_context(
        &self,
        target: &str,
        target_locks: Option<&[String]>,
        unique_only: bool,
        filter: &PathFilter,
    ) -> QueryResult<Vec<LockContext>> {
        let paths = if unique_only {
            self.tracer.unique_call_chains(target, None, filter).await?
        } else {
            self.tracer.trace_callers(target, None, filter).await?
        };

        let mut contexts = Vec::with_capacity(paths.len());
        for path in &paths {
            contexts.push(self.analyze_path_locks(path, target_locks).await?);
        }

        debug!(function = target, contexts = contexts.len(), "lock context analysis complete");
        Ok(contexts)
    }

    /// Per-path verdict on whether `lock_name` is held when `function` is
    /// reached. Returned in path order as (path string, protected) pairs.
    pub async fn check_lock_protection(
        &self,
        function: &str,
        lock_name: &str,
        unique_only: bool,
        filter: &PathFilter,
    ) -> QueryResult<Vec<(String, bool)>> {
        let targets = [lock_name.to_string()];
        let contexts = self
            .analyze_lock_context(function, Some(&targets), unique_only, filter)
            .await?;

        Ok(contexts
            .into_iter()
            .map(|context| {
                let protected = context.held_locks.contains(lock_name);
                (context.call_path.join(" -> "), protected)
            })
            .collect())
    }

    /// Contexts in which at least one of `required_locks` is not held.
    pub async fn find_unprotected_calls(
        &self,
        function: &str,
        required_locks: &[String],
        unique_only: bool,
        filter: &PathFilter,
    ) -> QueryResult<Vec<LockContext>> {
        let contexts = self
            .analyze_lock_context(function, Some(required_locks), unique_only, filter)
            .await?;

        Ok(contexts
            .into_iter()
            .filter(|context| {
                required_locks
                    .iter()
                    .any(|lock| !context.held_locks.contains(lock))
            })
            .collect())
    }

    /// Aggregate protection statistics over all unique caller chains.
    pub async fn lock_summary(&self, function: &str) -> QueryResult<LockSummary> {
        let contexts = self
            .analyze_lock_context(function, None, true, &PathFilter::default())
            .await?;

        let mut locks: BTreeSet<String> = BTreeSet::new();
        let mut protected_paths = 0;
        let mut unprotected_paths = 0;

        for context in &contexts {
            locks.extend(context.held_locks.iter().cloned());
            if context.held_locks.is_empty() {
                unprotected_paths += 1;
            } else {
                protected_paths += 1;
            }
        }

        Ok(LockSummary {
            function: function.to_string(),
            total_call_paths: contexts.len(),
            protected_paths,
            unprotected_paths,
            lock_count: locks.len(),
            locks_encountered: locks.into_iter().collect(),
        })
    }
}
