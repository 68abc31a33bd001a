//! In-memory symbol database for driving the engines without cscope.

#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;

use lock_trace::domain::call_site::{CallSite, FunctionAssignment};
use lock_trace::ports::{QueryResult, SymbolQuery};

#[derive(Debug, Default)]
pub struct MockSymbols {
    callees: HashMap<String, Vec<CallSite>>,
    callers: HashMap<String, Vec<CallSite>>,
    definitions: HashMap<String, CallSite>,
    assignments: HashMap<String, Vec<FunctionAssignment>>,
}

impl MockSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `caller` invoking `callee` at `line` with the given context
    /// text, wiring both directions of the relation.
    pub fn call_at(&mut self, caller: &str, callee: &str, line: usize, context: &str) {
        let site = |function: &str| CallSite {
            function: function.to_string(),
            file: format!("{caller}.c"),
            line,
            context: context.to_string(),
        };
        self.callees
            .entry(caller.to_string())
            .or_default()
            .push(site(callee));
        self.callers
            .entry(callee.to_string())
            .or_default()
            .push(site(caller));
    }

    /// Plain call edge where the context text does not matter.
    pub fn call(&mut self, caller: &str, callee: &str) {
        let line = self
            .callees
            .get(caller)
            .map(|sites| 10 * (sites.len() + 1))
            .unwrap_or(10);
        self.call_at(caller, callee, line, &format!("{callee}();"));
    }

    /// Record where a function is defined, for directory exclusion tests.
    pub fn define(&mut self, function: &str, file: &str) {
        self.definitions.insert(
            function.to_string(),
            CallSite {
                function: function.to_string(),
                file: file.to_string(),
                line: 1,
                context: format!("int {function}(void)"),
            },
        );
    }

    /// Register a callback assignment `.field = function`.
    pub fn assign(&mut self, function: &str, field: &str, file: &str, line: usize) {
        self.assignments
            .entry(function.to_string())
            .or_default()
            .push(FunctionAssignment {
                function: function.to_string(),
                field: field.to_string(),
                file: file.to_string(),
                line,
                context: format!(".{field} = {function},"),
                struct_name: None,
            });
    }
}

#[async_trait]
impl SymbolQuery for MockSymbols {
    async fn functions_called_by(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        Ok(self.callees.get(function).cloned().unwrap_or_default())
    }

    async fn functions_calling(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        Ok(self.callers.get(function).cloned().unwrap_or_default())
    }

    async fn function_exists(&self, function: &str) -> bool {
        self.definitions.contains_key(function)
            || self.callees.contains_key(function)
            || self.callers.contains_key(function)
    }

    async fn find_function_definition(&self, function: &str) -> Option<CallSite> {
        self.definitions.get(function).cloned()
    }

    async fn find_function_assignments(
        &self,
        function: &str,
    ) -> QueryResult<Vec<FunctionAssignment>> {
        Ok(self.assignments.get(function).cloned().unwrap_or_default())
    }

    async fn callback_callers(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        let direct = self.functions_calling(function).await?;
        if !direct.is_empty() {
            return Ok(direct);
        }

        let mut callers = Vec::new();
        for assignment in self.find_function_assignments(function).await? {
            callers.extend(self.functions_calling(&assignment.field).await?);
        }
        Ok(callers)
    }
}
