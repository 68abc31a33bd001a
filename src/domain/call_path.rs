use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordered chain of function names discovered by the tracer.
///
/// For caller chains index 0 is the outermost caller and the last element is
/// the traced function; for callee chains index 0 is the traced function and
/// the chain extends into what it calls. `depth` is the search depth the
/// chain was found at, always `functions.len() - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPath {
    pub functions: Vec<String>,
    pub depth: usize,
}

impl CallPath {
    pub fn new(functions: Vec<String>) -> Self {
        let depth = functions.len().saturating_sub(1);
        Self { functions, depth }
    }

    /// The function the chain terminates at (the analysis target, for caller
    /// chains).
    pub fn last(&self) -> Option<&str> {
        self.functions.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.functions.join(" -> "))
    }
}
