//! Use-case layer consumed by the CLI.
//!
//! Runs the tracer and analyzer against a symbol backend and renders the
//! reports (flat list, tree, or JSON). Every function-taking command checks
//! that the function exists before any traversal, so an unknown name is
//! reported instead of masquerading as an empty result.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;

use crate::domain::call_path::CallPath;
use crate::domain::call_tree::{build_call_tree, format_tree};
use crate::domain::lock_analyzer::{LockAnalyzer, LockContext};
use crate::domain::lock_patterns::{LockKind, LockOperation};
use crate::domain::tracer::{CallTracer, ChainDirection, PathFilter};
use crate::ports::SymbolQuery;

/// Output selection shared by all subcommands.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMode {
    /// Render unique chains as an ASCII tree.
    pub tree: bool,
    /// Show every traced path, including truncations and duplicates.
    pub verbose: bool,
    /// Emit the raw report as JSON instead of text.
    pub json: bool,
}

pub struct AnalysisUsecase {
    symbols: Arc<dyn SymbolQuery>,
    tracer: Arc<CallTracer>,
    analyzer: LockAnalyzer,
}

impl AnalysisUsecase {
    pub fn new(symbols: Arc<dyn SymbolQuery>, tracer: Arc<CallTracer>) -> Self {
        let analyzer = LockAnalyzer::new(symbols.clone(), tracer.clone());
        Self {
            symbols,
            tracer,
            analyzer,
        }
    }

    async fn ensure_known(&self, function: &str) -> Result<()> {
        if !self.symbols.function_exists(function).await {
            bail!("function '{function}' not found in cscope database");
        }
        Ok(())
    }

    /// `callers` / `callees` subcommands.
    pub async fn trace(
        &self,
        function: &str,
        direction: ChainDirection,
        max_depth: Option<usize>,
        mode: OutputMode,
        filter: &PathFilter,
    ) -> Result<()> {
        self.ensure_known(function).await?;

        let direction_text = match direction {
            ChainDirection::Caller => "to",
            ChainDirection::Callee => "from",
        };

        let paths = if !mode.tree && mode.verbose {
            match direction {
                ChainDirection::Caller => {
                    self.tracer.trace_callers(function, max_depth, filter).await?
                }
                ChainDirection::Callee => {
                    self.tracer.trace_callees(function, max_depth, filter).await?
                }
            }
        } else {
            match direction {
                ChainDirection::Caller => {
                    self.tracer
                        .unique_call_chains(function, max_depth, filter)
                        .await?
                }
                ChainDirection::Callee => {
                    self.tracer
                        .unique_callee_chains(function, max_depth, filter)
                        .await?
                }
            }
        };

        if mode.json {
            println!("{}", serde_json::to_string_pretty(&paths)?);
            return Ok(());
        }

        if paths.is_empty() {
            println!("No call paths found.");
            return Ok(());
        }

        if mode.tree {
            println!("Call tree {direction_text} function '{function}':");
            println!("{}", "=".repeat(50));
            for line in format_tree(&build_call_tree(&paths)) {
                println!("{line}");
            }
            println!("\nUnique call chains found: {}", paths.len());
        } else if mode.verbose {
            println!("All call paths {direction_text} function '{function}':");
            println!("{}", "=".repeat(50));
            for (i, path) in paths.iter().enumerate() {
                println!("{:3}: {path}", i + 1);
            }
            println!("\nTotal paths found: {}", paths.len());
        } else {
            println!("Unique call chains {direction_text} function '{function}':");
            println!("{}", "=".repeat(50));
            for path in &paths {
                println!("  - {path}");
            }
            println!("\nUnique call chains found: {}", paths.len());
        }

        Ok(())
    }

    /// `paths` subcommand: every route from one function to another.
    pub async fn find_paths(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<usize>,
        mode: OutputMode,
    ) -> Result<()> {
        self.ensure_known(from).await?;
        self.ensure_known(to).await?;

        let paths = self.tracer.find_call_paths(from, to, max_depth).await?;

        if mode.json {
            println!("{}", serde_json::to_string_pretty(&paths)?);
            return Ok(());
        }

        if paths.is_empty() {
            println!("No call paths found from '{from}' to '{to}'.");
            return Ok(());
        }

        println!("Call paths from '{from}' to '{to}':");
        println!("{}", "=".repeat(50));
        for (i, path) in paths.iter().enumerate() {
            println!("{:3}: {path}", i + 1);
        }
        println!("\nTotal paths found: {}", paths.len());
        Ok(())
    }

    /// `lock-check` subcommand.
    pub async fn check_lock_protection(
        &self,
        function: &str,
        lock: &str,
        mode: OutputMode,
        filter: &PathFilter,
    ) -> Result<()> {
        self.ensure_known(function).await?;

        let results = self
            .analyzer
            .check_lock_protection(function, lock, !mode.verbose, filter)
            .await?;

        if mode.json {
            let report: Vec<_> = results
                .iter()
                .map(|(path, protected)| json!({ "path": path, "protected": protected }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Lock protection analysis for function '{function}' with lock '{lock}':");
        println!("{}", "=".repeat(70));

        if results.is_empty() {
            println!("No call paths found for analysis.");
            return Ok(());
        }

        let protected_count = results.iter().filter(|(_, p)| *p).count();
        println!(
            "Summary: {protected_count}/{} paths have lock protection\n",
            results.len()
        );

        if mode.tree {
            let paths: Vec<CallPath> = results
                .iter()
                .map(|(path, _)| {
                    CallPath::new(path.split(" -> ").map(str::to_string).collect())
                })
                .collect();
            println!("Protection status tree:");
            for line in format_tree(&build_call_tree(&paths)) {
                println!("{line}");
            }
            println!("\nProtection status:");
            for (path, protected) in &results {
                let status = if *protected { "PROTECTED" } else { "UNPROTECTED" };
                println!("  {status}: {path}");
            }
        } else {
            for (path, protected) in &results {
                let status = if *protected {
                    "+ PROTECTED"
                } else {
                    "- UNPROTECTED"
                };
                println!("{status}: {path}");
            }
        }

        Ok(())
    }

    /// `lock-context` subcommand.
    pub async fn analyze_lock_context(
        &self,
        function: &str,
        locks: Option<&[String]>,
        mode: OutputMode,
        filter: &PathFilter,
    ) -> Result<()> {
        self.ensure_known(function).await?;

        let contexts = self
            .analyzer
            .analyze_lock_context(function, locks, !mode.verbose, filter)
            .await?;

        if mode.json {
            println!("{}", serde_json::to_string_pretty(&contexts)?);
            return Ok(());
        }

        println!("Lock context analysis for function '{function}':");
        if let Some(locks) = locks {
            println!("Tracking locks: {}", locks.join(", "));
        }
        println!("{}", "=".repeat(70));

        if contexts.is_empty() {
            println!("No call paths found for analysis.");
            return Ok(());
        }

        if mode.tree {
            let paths: Vec<CallPath> = contexts
                .iter()
                .map(|context| CallPath::new(context.call_path.clone()))
                .collect();
            println!("Lock context tree:");
            for line in format_tree(&build_call_tree(&paths)) {
                println!("{line}");
            }
            println!("\nLock context details:");
            for (i, context) in contexts.iter().enumerate() {
                println!(
                    "{:3}: Held locks: {}",
                    i + 1,
                    held_locks_display(context, locks)
                );
            }
        } else {
            for (i, context) in contexts.iter().enumerate() {
                println!("{:3}: {}", i + 1, context.call_path.join(" -> "));
                println!("     Held locks: {}", held_locks_display(context, locks));

                if !context.lock_operations.is_empty() {
                    println!("     Lock operations:");
                    for op in &context.lock_operations {
                        println!(
                            "       {} {} ({}) in {}",
                            op.action,
                            op.lock_name,
                            lock_kind_label(op),
                            op.function
                        );
                    }
                }
                println!();
            }
        }

        println!("\nCall chains found: {}", contexts.len());
        Ok(())
    }

    /// `unprotected` subcommand.
    pub async fn find_unprotected_calls(
        &self,
        function: &str,
        required_locks: &[String],
        mode: OutputMode,
        filter: &PathFilter,
    ) -> Result<()> {
        self.ensure_known(function).await?;

        let unprotected = self
            .analyzer
            .find_unprotected_calls(function, required_locks, !mode.verbose, filter)
            .await?;

        if mode.json {
            println!("{}", serde_json::to_string_pretty(&unprotected)?);
            return Ok(());
        }

        println!("Unprotected calls to function '{function}':");
        println!("Required locks: {}", required_locks.join(", "));
        println!("{}", "=".repeat(70));

        if unprotected.is_empty() {
            println!("All call paths are properly protected.");
            return Ok(());
        }

        println!("Found {} unprotected call paths:\n", unprotected.len());

        if mode.tree {
            let paths: Vec<CallPath> = unprotected
                .iter()
                .map(|context| CallPath::new(context.call_path.clone()))
                .collect();
            println!("Unprotected calls tree:");
            for line in format_tree(&build_call_tree(&paths)) {
                println!("{line}");
            }
            println!("\nMissing lock details:");
            for (i, context) in unprotected.iter().enumerate() {
                print_missing_locks(i, context, required_locks);
            }
        } else {
            for (i, context) in unprotected.iter().enumerate() {
                println!("{:3}: {}", i + 1, context.call_path.join(" -> "));
                print_missing_locks(i, context, required_locks);
                println!();
            }
        }

        Ok(())
    }

    /// `stats` subcommand.
    pub async fn function_stats(&self, function: &str, mode: OutputMode) -> Result<()> {
        self.ensure_known(function).await?;

        let call_stats = self.tracer.call_statistics(function).await?;
        let lock_summary = self.analyzer.lock_summary(function).await?;

        if mode.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "calls": call_stats,
                    "locks": lock_summary,
                }))?
            );
            return Ok(());
        }

        println!("Statistics for function '{function}':");
        println!("{}", "=".repeat(50));
        println!(
            "Callers: {} ({} unique)",
            call_stats.caller_count, call_stats.unique_callers
        );
        println!(
            "Callees: {} ({} unique)",
            call_stats.callee_count, call_stats.unique_callees
        );
        println!("Call paths: {}", lock_summary.total_call_paths);
        println!("Protected paths: {}", lock_summary.protected_paths);
        println!("Unprotected paths: {}", lock_summary.unprotected_paths);
        println!("Locks encountered: {}", lock_summary.lock_count);
        if !lock_summary.locks_encountered.is_empty() {
            println!("Lock names: {}", lock_summary.locks_encountered.join(", "));
        }

        Ok(())
    }
}

// With no lock filter the held set reflects protection evidence rather than
// instantaneous state, so the list view prints `None` and leaves judgement to
// the operations listing.
fn held_locks_display(context: &LockContext, requested: Option<&[String]>) -> String {
    if requested.is_none() || context.held_locks.is_empty() {
        return "None".to_string();
    }
    context
        .held_locks
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_missing_locks(index: usize, context: &LockContext, required: &[String]) {
    let missing: Vec<&str> = required
        .iter()
        .filter(|lock| !context.held_locks.contains(*lock))
        .map(String::as_str)
        .collect();
    println!("{:3}: Missing: {}", index + 1, missing.join(", "));
    if !context.held_locks.is_empty() {
        let held: Vec<&str> = context.held_locks.iter().map(String::as_str).collect();
        println!("     Held: {}", held.join(", "));
    }
}

// The custom family groups several kernel-global locks; label them by their
// name so the listing reads `rtnl`/`netdev`/`netlink` instead of `custom`.
fn lock_kind_label(op: &LockOperation) -> &'static str {
    match op.kind {
        LockKind::Custom => {
            let name = op.lock_name.to_lowercase();
            if name.starts_with("rtnl") {
                "rtnl"
            } else if name.starts_with("netdev") {
                "netdev"
            } else if name.contains("netlink") || name.contains("genl") {
                "netlink"
            } else {
                "custom"
            }
        }
        LockKind::Spinlock => "spinlock",
        LockKind::Mutex => "mutex",
        LockKind::RwLock => "rwlock",
        LockKind::Rcu => "rcu",
        LockKind::Semaphore => "semaphore",
    }
}
