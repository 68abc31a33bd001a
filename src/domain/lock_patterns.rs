//! Pattern-based lock classification.
//!
//! A declarative table of {kind, action, regex} rules maps call-site text to
//! typed lock operations. The rwlock rows need negative lookbehind so that
//! `rcu_read_lock` is never misread as a plain `read_lock`; the table is
//! therefore compiled with `fancy_regex`, while the simpler name-extraction
//! patterns use the plain `regex` engine.

use std::fmt;

use fancy_regex::Regex as FancyRegex;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::call_site::CallSite;

/// Lock families recognized by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Spinlock,
    Mutex,
    RwLock,
    Rcu,
    Semaphore,
    Custom,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockKind::Spinlock => "spinlock",
            LockKind::Mutex => "mutex",
            LockKind::RwLock => "rwlock",
            LockKind::Rcu => "rcu",
            LockKind::Semaphore => "semaphore",
            LockKind::Custom => "custom",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Acquire,
    Release,
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockAction::Acquire => "acquire",
            LockAction::Release => "release",
        })
    }
}

/// One detected lock call within a function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOperation {
    pub lock_name: String,
    pub kind: LockKind,
    pub action: LockAction,
    /// The function whose body contains the call, never the lock primitive.
    pub function: String,
    pub file: String,
    pub line: usize,
    pub context: String,
}

struct LockRule {
    kind: LockKind,
    action: LockAction,
    patterns: Vec<FancyRegex>,
}

fn rule(kind: LockKind, action: LockAction, patterns: &[&str]) -> LockRule {
    LockRule {
        kind,
        action,
        patterns: patterns
            .iter()
            .map(|p| FancyRegex::new(p).unwrap_or_else(|e| panic!("lock pattern: {e}")))
            .collect(),
    }
}

// Ordered rule table. The semaphore family has no textual rules yet; the
// variant exists so classified data can carry it.
static LOCK_RULES: Lazy<Vec<LockRule>> = Lazy::new(|| {
    use LockAction::{Acquire, Release};
    use LockKind::{Custom, Mutex, Rcu, RwLock, Spinlock};

    vec![
        rule(
            Spinlock,
            Acquire,
            &[
                r"spin_lock\s*\(",
                r"spin_lock_irq\s*\(",
                r"spin_lock_irqsave\s*\(",
                r"spin_lock_bh\s*\(",
            ],
        ),
        rule(
            Spinlock,
            Release,
            &[
                r"spin_unlock\s*\(",
                r"spin_unlock_irq\s*\(",
                r"spin_unlock_irqrestore\s*\(",
                r"spin_unlock_bh\s*\(",
            ],
        ),
        rule(
            Mutex,
            Acquire,
            &[
                r"mutex_lock\s*\(",
                r"mutex_lock_interruptible\s*\(",
                r"mutex_trylock\s*\(",
            ],
        ),
        rule(Mutex, Release, &[r"mutex_unlock\s*\("]),
        rule(
            RwLock,
            Acquire,
            &[
                r"(?<!rcu_)read_lock\s*\(",
                r"(?<!rcu_)write_lock\s*\(",
                r"(?<!rcu_)read_lock_irq\s*\(",
                r"(?<!rcu_)write_lock_irq\s*\(",
                r"(?<!rcu_)read_lock_bh\s*\(",
                r"(?<!rcu_)write_lock_bh\s*\(",
            ],
        ),
        rule(
            RwLock,
            Release,
            &[
                r"(?<!rcu_)read_unlock\s*\(",
                r"(?<!rcu_)write_unlock\s*\(",
                r"(?<!rcu_)read_unlock_irq\s*\(",
                r"(?<!rcu_)write_unlock_irq\s*\(",
                r"(?<!rcu_)read_unlock_bh\s*\(",
                r"(?<!rcu_)write_unlock_bh\s*\(",
            ],
        ),
        rule(Rcu, Acquire, &[r"rcu_read_lock\s*\(", r"rcu_read_lock_bh\s*\("]),
        rule(Rcu, Release, &[r"rcu_read_unlock\s*\(", r"rcu_read_unlock_bh\s*\("]),
        rule(
            Custom,
            Acquire,
            &[
                r"rtnl_lock\s*\(",
                r"rtnl_trylock\s*\(",
                r"rtnl_net_lock\s*\(",
                r"rtnl_nets_lock\s*\(",
                r"netdev_lock_ops\s*\(",
                r"netlink_table_grab\s*\(",
                r"genl_lock\s*\(",
            ],
        ),
        rule(
            Custom,
            Release,
            &[
                r"rtnl_unlock\s*\(",
                r"rtnl_net_unlock\s*\(",
                r"rtnl_nets_unlock\s*\(",
                r"netdev_unlock_ops\s*\(",
                r"netlink_table_ungrab\s*\(",
                r"genl_unlock\s*\(",
            ],
        ),
    ]
});

// Callees whose own name is the lock identity. rtnl/netdev names only count
// when they actually contain "lock"; others fall through to extraction.
const NAME_IS_LOCK_PREFIXES: &[&str] = &["rcu_read_", "rtnl", "netdev_", "netlink_", "genl"];

static PAREN_ARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(&?([a-zA-Z_][a-zA-Z0-9_]*)\)").unwrap_or_else(|e| panic!("regex: {e}"))
});

static LEADING_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").unwrap_or_else(|e| panic!("regex: {e}"))
});

/// Classify one call site against the rule table.
///
/// A rule matches if its regex matches the site's context text or the callee
/// name. At most one operation is emitted per (kind, action) row, but several
/// rows may each emit for the same site; all matches are kept.
pub fn identify_lock_operations(site: &CallSite, owner: &str) -> Vec<LockOperation> {
    let mut operations = Vec::new();

    for rule in LOCK_RULES.iter() {
        let matched = rule.patterns.iter().any(|pattern| {
            pattern.is_match(&site.context).unwrap_or(false)
                || pattern.is_match(&site.function).unwrap_or(false)
        });
        if matched {
            operations.push(LockOperation {
                lock_name: extract_lock_name(&site.context, &site.function),
                kind: rule.kind,
                action: rule.action,
                function: owner.to_string(),
                file: site.file.clone(),
                line: site.line,
                context: site.context.clone(),
            });
        }
    }

    operations
}

/// Work out the lock identifier for a classified call.
///
/// Calls whose name carries the identity (RCU read-side, the custom kernel
/// globals) use the callee name itself; everything else tries to pull a
/// `(&var)` / `(var)` argument out of the context, then any leading
/// identifier that is not the callee, then falls back to the callee name.
pub fn extract_lock_name(context: &str, function: &str) -> String {
    if NAME_IS_LOCK_PREFIXES
        .iter()
        .any(|prefix| function.starts_with(prefix))
    {
        if function.starts_with("rtnl") || function.starts_with("netdev_") {
            if function.contains("lock") {
                return function.to_string();
            }
        } else {
            return function.to_string();
        }
    }

    if let Some(capture) = PAREN_ARG.captures(context) {
        return capture[1].to_string();
    }

    if let Some(capture) = LEADING_CALL.captures(context) {
        if &capture[1] != function {
            return capture[1].to_string();
        }
    }

    function.to_string()
}

struct MatchGroup {
    name_patterns: &'static [&'static str],
    generic_targets: &'static [&'static str],
}

// Maps lock-name substrings to the generic target aliases users may pass.
const MATCH_GROUPS: &[MatchGroup] = &[
    MatchGroup {
        name_patterns: &["rcu_read_lock", "rcu_read_unlock"],
        generic_targets: &["rcu", "rcu_lock"],
    },
    MatchGroup {
        name_patterns: &["rtnl"],
        generic_targets: &["rtnl", "rtnl_lock"],
    },
    MatchGroup {
        name_patterns: &["netdev_"],
        generic_targets: &["netdev", "netdev_lock"],
    },
    MatchGroup {
        name_patterns: &["spin_lock", "spin_unlock"],
        generic_targets: &["spin", "spin_lock", "spinlock"],
    },
    MatchGroup {
        name_patterns: &["mutex_lock", "mutex_unlock"],
        generic_targets: &["mutex", "mutex_lock"],
    },
];

/// Whether a detected lock name satisfies any of the requested target locks,
/// either by exact name or through a generic alias of its pattern group.
pub fn lock_matches_target(lock_name: &str, targets: &[String]) -> bool {
    if targets.iter().any(|target| target == lock_name) {
        return true;
    }

    let lowered = lock_name.to_lowercase();
    for group in MATCH_GROUPS {
        if group
            .name_patterns
            .iter()
            .any(|pattern| lowered.contains(pattern))
        {
            if targets
                .iter()
                .any(|target| group.generic_targets.contains(&target.to_lowercase().as_str()))
            {
                return true;
            }
        }
    }

    false
}
