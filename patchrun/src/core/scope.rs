//! Declared-vs-touched scope classification.
//!
//! Pure rule evaluation: given the declared set (from change metadata), the
//! touched set (actual diff versus the base commit), and the blessed-output
//! allowlist, compute every violation independently. Overrides are applied by
//! the orchestrator, not here.

use std::collections::BTreeSet;

use serde::Serialize;

/// Classification of one scope check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeVerdict {
    Ok,
    UndeclaredTouched,
    DeclaredNotTouched,
    Noop,
}

/// Full scope evaluation. All three checks are independent; any one of them
/// can fail a run even when the others pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
    /// Touched but neither declared nor blessed, sorted.
    pub undeclared: Vec<String>,
    /// Declared but not actually touched, sorted.
    pub untouched: Vec<String>,
    /// True when the touched set (after exclusions) is empty.
    pub noop: bool,
    /// Touched paths remaining after the blessed allowlist is removed, sorted.
    pub effective_touched: Vec<String>,
}

impl ScopeReport {
    /// First violation in fixed order, or `Ok`.
    pub fn verdict(&self) -> ScopeVerdict {
        if !self.undeclared.is_empty() {
            ScopeVerdict::UndeclaredTouched
        } else if !self.untouched.is_empty() {
            ScopeVerdict::DeclaredNotTouched
        } else if self.noop {
            ScopeVerdict::Noop
        } else {
            ScopeVerdict::Ok
        }
    }

    pub fn is_ok(&self) -> bool {
        self.verdict() == ScopeVerdict::Ok
    }
}

/// True when `path` falls under one of the blessed generated-output prefixes.
pub fn is_blessed(path: &str, blessed_prefixes: &[String]) -> bool {
    blessed_prefixes.iter().any(|prefix| {
        let trimmed = prefix.trim_end_matches('/');
        path == trimmed || path.starts_with(&format!("{trimmed}/"))
    })
}

/// Compare the declared set against the touched set.
///
/// Blessed prefixes are excluded from both sets before comparison, so a
/// generated-output path neither needs a declaration nor counts as an
/// untouched declaration.
pub fn evaluate(
    declared: &BTreeSet<String>,
    touched: &BTreeSet<String>,
    blessed_prefixes: &[String],
) -> ScopeReport {
    let declared: BTreeSet<&String> = declared
        .iter()
        .filter(|p| !is_blessed(p, blessed_prefixes))
        .collect();
    let effective: BTreeSet<&String> = touched
        .iter()
        .filter(|p| !is_blessed(p, blessed_prefixes))
        .collect();

    let undeclared = effective
        .iter()
        .filter(|p| !declared.contains(**p))
        .map(|p| (*p).clone())
        .collect();
    let untouched = declared
        .iter()
        .filter(|p| !effective.contains(**p))
        .map(|p| (*p).clone())
        .collect();

    ScopeReport {
        undeclared,
        untouched,
        noop: effective.is_empty(),
        effective_touched: effective.iter().map(|p| (*p).clone()).collect(),
    }
}
