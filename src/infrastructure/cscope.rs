//! Cscope-backed implementation of the symbol query port.
//!
//! Every query shells out to `cscope -d` against a prebuilt database and
//! parses its line-oriented output (`file function line context`). Each
//! invocation carries its own deadline; a dropped query kills the child
//! process, so cancelling a top-level analysis aborts everything it spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::call_site::{CallSite, FunctionAssignment};
use crate::ports::{QueryError, QueryResult, SymbolQuery};

// Graph queries may walk large databases; structural probes stay short.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cscope line-mode query kinds (`-L -<n>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CscopeQuery {
    /// `-0`: all references to a symbol.
    SymbolRefs,
    /// `-1`: definition of a symbol.
    Definition,
    /// `-2`: functions called by a function.
    CalledBy,
    /// `-3`: functions calling a function.
    Calling,
}

impl CscopeQuery {
    fn flag(self) -> &'static str {
        match self {
            CscopeQuery::SymbolRefs => "-0",
            CscopeQuery::Definition => "-1",
            CscopeQuery::CalledBy => "-2",
            CscopeQuery::Calling => "-3",
        }
    }
}

/// Describes the cscope invocation for a query without executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CscopeCommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the command specification for one query (testable function).
pub fn build_command_spec(
    cscope_file: &Path,
    query: CscopeQuery,
    symbol: &str,
) -> CscopeCommandSpec {
    CscopeCommandSpec {
        program: "cscope".to_string(),
        args: vec![
            "-d".to_string(),
            "-f".to_string(),
            cscope_file.display().to_string(),
            "-L".to_string(),
            query.flag().to_string(),
            symbol.to_string(),
        ],
    }
}

// Matches `[static] struct <type> <ident> = {` near a callback assignment.
static STRUCT_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:static\s+)?struct\s+(\w+)\s+\w+\s*=\s*\{")
        .unwrap_or_else(|e| panic!("regex: {e}"))
});

/// Symbol query backend over a cscope database on disk.
pub struct CscopeIndex {
    cscope_file: PathBuf,
    source_dir: PathBuf,
}

impl CscopeIndex {
    /// `cscope_file` defaults to `cscope.out` inside `database_path`;
    /// `source_dir` defaults to `database_path` itself.
    pub fn new(
        database_path: PathBuf,
        cscope_file: Option<PathBuf>,
        source_dir: Option<PathBuf>,
    ) -> Self {
        let cscope_file = cscope_file.unwrap_or_else(|| database_path.join("cscope.out"));
        let source_dir = source_dir.unwrap_or_else(|| database_path.clone());
        Self {
            cscope_file,
            source_dir,
        }
    }

    /// Probe the database once at setup. Failures here are configuration
    /// errors: report them and exit before any traversal starts.
    pub async fn validate(&self) -> Result<()> {
        if !self.cscope_file.exists() {
            bail!(
                "cscope database file not found: {}",
                self.cscope_file.display()
            );
        }
        if !self.source_dir.exists() {
            bail!("source directory not found: {}", self.source_dir.display());
        }

        match self
            .run_cscope(CscopeQuery::SymbolRefs, "main", PROBE_TIMEOUT)
            .await
        {
            Ok(Some(_)) => {
                info!(database = %self.cscope_file.display(), "cscope database validated");
                Ok(())
            }
            Ok(None) => bail!(
                "cscope database invalid or corrupted: {}",
                self.cscope_file.display()
            ),
            Err(QueryError::Timeout { .. }) => {
                bail!("cscope probe query timed out; the database may be corrupted")
            }
            Err(QueryError::Unavailable { reason }) => {
                bail!("cscope is not usable: {reason}")
            }
        }
    }

    // Run one line-mode query. `Ok(None)` means cscope exited non-zero,
    // which graph queries treat as an empty result.
    async fn run_cscope(
        &self,
        query: CscopeQuery,
        symbol: &str,
        deadline: Duration,
    ) -> QueryResult<Option<String>> {
        let spec = build_command_spec(&self.cscope_file, query, symbol);
        debug!(?query, symbol, "running cscope");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&self.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QueryError::Unavailable {
                reason: format!("failed to spawn cscope: {e}"),
            })?;

        let output = timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| QueryError::Timeout {
                query: format!("{} {}", query.flag(), symbol),
                timeout: deadline,
            })?
            .map_err(|e| QueryError::Unavailable {
                reason: format!("cscope did not run to completion: {e}"),
            })?;

        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    // ───────────────────────────────────────────────────────────────────
    // Callback caller heuristics
    // ───────────────────────────────────────────────────────────────────

    // Best-effort narrowing of field callers by the structure type seen at
    // the assignment site. Anything inconclusive keeps the caller.
    async fn filter_callers_by_struct(
        &self,
        callers: Vec<CallSite>,
        assignment: &FunctionAssignment,
    ) -> Vec<CallSite> {
        let Some(struct_name) = self.struct_name_near_assignment(assignment).await else {
            return callers;
        };
        if !self.struct_exists(&struct_name).await {
            return callers;
        }

        let needle = struct_name.to_lowercase();
        let confirmed = callers
            .iter()
            .filter(|caller| caller.context.to_lowercase().contains(&needle))
            .count();
        debug!(
            %struct_name,
            confirmed,
            total = callers.len(),
            "struct-context check kept inconclusive callers"
        );
        callers
    }

    // Scan the source lines around the assignment for an enclosing struct
    // literal. Read failures degrade to "no structure detected".
    async fn struct_name_near_assignment(
        &self,
        assignment: &FunctionAssignment,
    ) -> Option<String> {
        let path = self.source_dir.join(&assignment.file);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        let lines: Vec<&str> = content.lines().collect();

        let start = assignment.line.saturating_sub(50).min(lines.len());
        let end = (assignment.line + 10).min(lines.len());

        for line in &lines[start..end] {
            if let Some(capture) = STRUCT_LITERAL.captures(line.trim()) {
                return Some(capture[1].to_string());
            }
        }
        None
    }

    async fn struct_exists(&self, struct_name: &str) -> bool {
        let symbol = format!("struct {struct_name}");
        matches!(
            self.run_cscope(CscopeQuery::Definition, &symbol, PROBE_TIMEOUT)
                .await,
            Ok(Some(output)) if !output.trim().is_empty()
        )
    }
}

#[async_trait]
impl SymbolQuery for CscopeIndex {
    async fn functions_called_by(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        let output = self
            .run_cscope(CscopeQuery::CalledBy, function, QUERY_TIMEOUT)
            .await?;
        Ok(output.as_deref().map(parse_call_sites).unwrap_or_default())
    }

    async fn functions_calling(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        let output = self
            .run_cscope(CscopeQuery::Calling, function, QUERY_TIMEOUT)
            .await?;
        Ok(output.as_deref().map(parse_call_sites).unwrap_or_default())
    }

    async fn function_exists(&self, function: &str) -> bool {
        match self
            .run_cscope(CscopeQuery::Definition, function, PROBE_TIMEOUT)
            .await
        {
            Ok(Some(output)) => !output.trim().is_empty(),
            Ok(None) => false,
            Err(QueryError::Timeout { .. }) => false,
            Err(error) => {
                warn!(function, %error, "existence check failed");
                false
            }
        }
    }

    async fn find_function_definition(&self, function: &str) -> Option<CallSite> {
        match self
            .run_cscope(CscopeQuery::Definition, function, PROBE_TIMEOUT)
            .await
        {
            Ok(Some(output)) => parse_call_sites(&output).into_iter().next(),
            _ => None,
        }
    }

    async fn find_function_assignments(
        &self,
        function: &str,
    ) -> QueryResult<Vec<FunctionAssignment>> {
        let output = self
            .run_cscope(CscopeQuery::SymbolRefs, function, QUERY_TIMEOUT)
            .await?;
        Ok(output
            .as_deref()
            .map(|text| parse_assignments(text, function))
            .unwrap_or_default())
    }

    async fn callback_callers(&self, function: &str) -> QueryResult<Vec<CallSite>> {
        let direct = self.functions_calling(function).await?;
        if !direct.is_empty() {
            return Ok(direct);
        }

        // No source-level callers: look for function-pointer registrations
        // and chase the callers of each registered field instead.
        let assignments = self.find_function_assignments(function).await?;
        let mut callers = Vec::new();
        for assignment in &assignments {
            let field_callers = self.functions_calling(&assignment.field).await?;
            callers.extend(self.filter_callers_by_struct(field_callers, assignment).await);
        }
        Ok(callers)
    }
}

/// Parse cscope line-mode output into call sites. Lines that do not carry
/// all four fields or a numeric line number are skipped.
fn parse_call_sites(output: &str) -> Vec<CallSite> {
    let mut sites = Vec::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(4, ' ');
        let (Some(file), Some(function), Some(line_no), Some(context)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(line_no) = line_no.parse::<usize>() else {
            continue;
        };

        sites.push(CallSite {
            function: function.to_string(),
            file: file.to_string(),
            line: line_no,
            context: context.trim().to_string(),
        });
    }

    sites
}

/// Extract `.field = <function>` assignments from `-0` output.
fn parse_assignments(output: &str, function: &str) -> Vec<FunctionAssignment> {
    let Ok(pattern) = Regex::new(&format!(r"\.(\w+)\s*=\s*{}\b", regex::escape(function))) else {
        return Vec::new();
    };

    let mut assignments = Vec::new();
    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        // Second field is the enclosing scope, possibly `<global>`.
        let mut fields = line.splitn(4, ' ');
        let (Some(file), Some(_scope), Some(line_no), Some(context)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(line_no) = line_no.parse::<usize>() else {
            continue;
        };

        if let Some(capture) = pattern.captures(context) {
            assignments.push(FunctionAssignment {
                function: function.to_string(),
                field: capture[1].to_string(),
                file: file.to_string(),
                line: line_no,
                context: context.trim().to_string(),
                struct_name: None,
            });
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_for_callers_query() {
        let spec = build_command_spec(Path::new("cscope.out"), CscopeQuery::Calling, "schedule");
        assert_eq!(spec.program, "cscope");
        assert_eq!(
            spec.args,
            vec!["-d", "-f", "cscope.out", "-L", "-3", "schedule"]
        );
    }

    #[test]
    fn command_spec_flags_differ_per_query() {
        let file = Path::new("db/cscope.out");
        assert!(build_command_spec(file, CscopeQuery::SymbolRefs, "x").args.contains(&"-0".to_string()));
        assert!(build_command_spec(file, CscopeQuery::Definition, "x").args.contains(&"-1".to_string()));
        assert!(build_command_spec(file, CscopeQuery::CalledBy, "x").args.contains(&"-2".to_string()));
    }

    #[test]
    fn parses_well_formed_output_lines() {
        let output = "net/core/dev.c dev_open 1542 ret = __dev_open(dev);\n\
                      kernel/sched.c schedule 4711 schedule();\n";
        let sites = parse_call_sites(output);

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].function, "dev_open");
        assert_eq!(sites[0].file, "net/core/dev.c");
        assert_eq!(sites[0].line, 1542);
        assert_eq!(sites[0].context, "ret = __dev_open(dev);");
    }

    #[test]
    fn skips_short_and_malformed_lines() {
        let output = "only three fields\n\
                      file func notanumber context here\n\
                      \n\
                      a.c f 10 good(line);\n";
        let sites = parse_call_sites(output);

        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].line, 10);
    }

    #[test]
    fn finds_callback_assignments() {
        let output = "drivers/net/hsr.c <global> 88 .ndo_open = hsr_dev_open,\n\
                      drivers/net/hsr.c hsr_probe 120 hsr_dev_open(dev);\n";
        let assignments = parse_assignments(output, "hsr_dev_open");

        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].field, "ndo_open");
        assert_eq!(assignments[0].line, 88);
        assert_eq!(assignments[0].function, "hsr_dev_open");
    }

    #[test]
    fn assignment_match_requires_word_boundary() {
        let output = "a.c <global> 5 .open = my_open_v2,\n";
        assert!(parse_assignments(output, "my_open").is_empty());
    }

    #[test]
    fn struct_literal_pattern_matches_static_and_plain() {
        assert!(STRUCT_LITERAL.is_match("static struct net_device_ops hsr_ops = {"));
        assert!(STRUCT_LITERAL.is_match("struct rtnl_link_ops hsr_link_ops = {"));
        assert!(!STRUCT_LITERAL.is_match("struct hsr_priv *priv;"));
    }

    #[test]
    fn default_paths_derive_from_database_dir() {
        let index = CscopeIndex::new(PathBuf::from("/tmp/db"), None, None);
        assert_eq!(index.cscope_file, PathBuf::from("/tmp/db/cscope.out"));
        assert_eq!(index.source_dir, PathBuf::from("/tmp/db"));
    }

    #[tokio::test]
    async fn validate_rejects_missing_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = CscopeIndex::new(dir.path().to_path_buf(), None, None);

        let error = index.validate().await.unwrap_err();
        assert!(error.to_string().contains("cscope database file not found"));
    }
}
