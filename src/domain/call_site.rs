use serde::{Deserialize, Serialize};

/// One textual occurrence of a call relationship, as reported by the symbol
/// database. `function` is the callee for "called by" queries and the caller
/// for "calling" queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub function: String,
    pub file: String,
    pub line: usize,
    pub context: String,
}

/// A function-pointer field assignment (`.field = function`) recovered from
/// symbol references. These are how callers that only reach a function
/// through a callback table are found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAssignment {
    /// The function being registered.
    pub function: String,
    /// The structure field it is assigned to (e.g. `ndo_open`).
    pub field: String,
    pub file: String,
    pub line: usize,
    pub context: String,
    /// Enclosing structure type, when the heuristic could detect one.
    pub struct_name: Option<String>,
}
