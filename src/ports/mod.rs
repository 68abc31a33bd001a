//! Boundary to the external symbol database.
//!
//! The tracer and analyzer never talk to cscope directly; they consume this
//! trait. Every method is one external-process round trip, and these calls
//! are the only suspension points in the whole analysis.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::call_site::{CallSite, FunctionAssignment};

/// Failure of a single symbol query.
///
/// A timeout is deliberately distinguishable from an empty result so callers
/// can surface it instead of mistaking it for "no callers found".
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("symbol query `{query}` timed out after {timeout:?}")]
    Timeout { query: String, timeout: Duration },

    #[error("symbol index unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Trait for symbol database backends.
/// Implementations must be safe to share across concurrent top-level queries.
#[async_trait]
pub trait SymbolQuery: Send + Sync {
    /// Call sites inside the body of `function` (the "what do I call" relation).
    async fn functions_called_by(&self, function: &str) -> QueryResult<Vec<CallSite>>;

    /// Call sites that invoke `function` (the "who calls me" relation).
    async fn functions_calling(&self, function: &str) -> QueryResult<Vec<CallSite>>;

    /// Cheap existence probe. A timeout is treated as a negative result.
    async fn function_exists(&self, function: &str) -> bool;

    /// Definition location of `function`. A timeout is treated as "unknown".
    async fn find_function_definition(&self, function: &str) -> Option<CallSite>;

    /// Occurrences of `.field = function` (callback registrations).
    async fn find_function_assignments(&self, function: &str)
        -> QueryResult<Vec<FunctionAssignment>>;

    /// Direct callers if any exist; otherwise callers recovered through
    /// function-pointer field assignments, narrowed by a best-effort
    /// structural heuristic (inconclusive candidates are kept, not dropped).
    async fn callback_callers(&self, function: &str) -> QueryResult<Vec<CallSite>>;
}
