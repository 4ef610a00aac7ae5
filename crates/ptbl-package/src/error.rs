// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Closed taxonomy of resolution rule violations.
///
/// Every variant carries a stable rule identifier (see [`ResolveError::rule_id`])
/// plus free-text detail. Shape defects in the raw documents (wrong field
/// types, non-mapping top level, duplicate module ids) are deliberately *not*
/// part of this taxonomy -- they are fatal configuration errors raised as
/// plain [`anyhow::Error`] values by the loader.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Repro mode was requested but no lock file was loaded.
    #[error("RESOLVE_LOCK_MISSING: {0}")]
    LockMissing(String),

    /// A local import's target module cannot be found, or a required lock
    /// entry/field for a non-local import is absent in repro mode.
    #[error("RESOLVE_UNRESOLVED_IMPORT: {0}")]
    UnresolvedImport(String),

    /// A module was reached while still on the active traversal path.
    #[error("RESOLVE_CYCLE: {0}")]
    Cycle(String),

    /// A registry import disagrees with its lock pin, or two imports request
    /// different versions of the same registry package.
    #[error("RESOLVE_CONFLICT: {0}")]
    Conflict(String),

    /// A local import path is absolute, contains a `..` segment, or
    /// normalizes outside the workspace root.
    #[error("RESOLVE_PATH_TRAVERSAL: {0}")]
    PathTraversal(String),

    /// An import's source tag is not one of the four recognized kinds.
    #[error("RESOLVE_SOURCE_UNSUPPORTED: {0}")]
    SourceUnsupported(String),
}

impl ResolveError {
    /// The stable rule identifier for this condition. Downstream tooling
    /// (parity fixtures, diagnostics) keys on these strings.
    pub fn rule_id(&self) -> &'static str {
        match self {
            ResolveError::LockMissing(_) => "RESOLVE_LOCK_MISSING",
            ResolveError::UnresolvedImport(_) => "RESOLVE_UNRESOLVED_IMPORT",
            ResolveError::Cycle(_) => "RESOLVE_CYCLE",
            ResolveError::Conflict(_) => "RESOLVE_CONFLICT",
            ResolveError::PathTraversal(_) => "RESOLVE_PATH_TRAVERSAL",
            ResolveError::SourceUnsupported(_) => "RESOLVE_SOURCE_UNSUPPORTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_rule_id_and_detail() {
        let err = ResolveError::Cycle("Cycle detected: a -> b -> a".to_string());
        assert_eq!(err.rule_id(), "RESOLVE_CYCLE");
        assert_eq!(
            err.to_string(),
            "RESOLVE_CYCLE: Cycle detected: a -> b -> a"
        );
    }
}
