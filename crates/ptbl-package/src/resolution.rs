// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic dependency resolution over a loaded [`Workspace`].
//!
//! The walk is a depth-first traversal of the entry modules' import graph:
//! local imports recurse before the importing module emits its own record,
//! non-local imports are recorded with their lock policy applied, and the
//! collected items are deduplicated and canonically sorted at the end.
//! Repeated resolution of the same workspace yields byte-identical output.

use crate::{
    document::{get_str, get_value},
    error::ResolveError,
    layout::SPEC_EXTENSION,
    manifest::{is_os_absolute, ImportSpec},
    workspace::Workspace,
};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Resolution mode. Dev places no pin requirements; repro fails closed unless
/// every non-local import is pinned in the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Repro,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Mode::Dev),
            "repro" => Ok(Mode::Repro),
            other => Err(anyhow!("mode must be dev or repro, got '{}'", other)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Dev => "dev",
            Mode::Repro => "repro",
        })
    }
}

/// Kind of a resolved item, in its canonical lowercase spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Module,
    Registry,
    Git,
    Url,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Module => "module",
            ItemKind::Registry => "registry",
            ItemKind::Git => "git",
            ItemKind::Url => "url",
        }
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the final resolution: a stable key, its kind, whether the
/// resolution ran under reproducibility guarantees, and kind-specific
/// metadata. This is the resolver's sole externally visible output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedItem {
    pub key: String,
    pub kind: ItemKind,
    pub locked: bool,
    pub meta: BTreeMap<String, String>,
}

/// Per-call traversal state. Owned by one `resolve_workspace` invocation, so
/// concurrent resolutions over a shared workspace never interfere.
#[derive(Default)]
struct ResolutionState {
    items: Vec<ResolvedItem>,
    visited: BTreeSet<String>,
    stack: Vec<String>,
    // Registry conflict tracker: package name -> every requested version.
    registry_requested: BTreeMap<String, BTreeSet<String>>,
}

/// Resolves the workspace's entry-module import graph into a deduplicated,
/// canonically ordered list of [`ResolvedItem`]s, or fails with the first
/// rule violated in traversal order.
pub fn resolve_workspace(workspace: &Workspace, mode: Mode) -> Result<Vec<ResolvedItem>> {
    if mode == Mode::Repro && workspace.lock.is_none() {
        return Err(ResolveError::LockMissing("Repro mode requires lock.ptbl".to_string()).into());
    }

    let pins = lock_pins(workspace)?;
    let entry_module_ids = entry_modules(workspace)?;

    let mut state = ResolutionState::default();
    for module_id in &entry_module_ids {
        walk_module(workspace, mode, &pins, &mut state, module_id)?;
    }

    // Global check: a conflict across imports is only visible once the whole
    // graph is known.
    for (name, versions) in &state.registry_requested {
        if versions.len() > 1 {
            let versions: Vec<&str> = versions.iter().map(String::as_str).collect();
            return Err(ResolveError::Conflict(format!(
                "Registry version conflict for {}: {:?}",
                name, versions
            ))
            .into());
        }
    }

    // Dedup by (kind, key) keeping first-seen, then canonical sort so output
    // never depends on declaration order anywhere in the workspace.
    let mut seen: BTreeSet<(ItemKind, String)> = BTreeSet::new();
    let mut unique: Vec<ResolvedItem> = Vec::with_capacity(state.items.len());
    for item in state.items {
        if seen.insert((item.kind, item.key.clone())) {
            unique.push(item);
        }
    }
    unique.sort_by(|a, b| {
        (a.kind.as_str(), a.key.to_lowercase()).cmp(&(b.kind.as_str(), b.key.to_lowercase()))
    });

    debug!(%mode, items = unique.len(), "workspace resolution complete");
    Ok(unique)
}

fn walk_module(
    workspace: &Workspace,
    mode: Mode,
    pins: &Mapping,
    state: &mut ResolutionState,
    module_id: &str,
) -> Result<()> {
    if state.stack.iter().any(|id| id == module_id) {
        let mut cycle: Vec<&str> = state.stack.iter().map(String::as_str).collect();
        cycle.push(module_id);
        return Err(
            ResolveError::Cycle(format!("Cycle detected: {}", cycle.join(" -> "))).into(),
        );
    }
    if state.visited.contains(module_id) {
        return Ok(());
    }

    let spec = workspace.modules.get(module_id).ok_or_else(|| {
        ResolveError::UnresolvedImport(format!("Missing module_id: {}", module_id))
    })?;

    state.stack.push(module_id.to_string());
    let locked = mode == Mode::Repro;

    // Imports come pre-sorted from the loader, so traversal order is fixed.
    for import in &spec.imports {
        match import {
            ImportSpec::Local { path, .. } => {
                let abs_path = resolve_local_path(workspace, path)?;
                let target_id = workspace
                    .modules
                    .iter()
                    .find(|(_, m)| m.file_path == abs_path)
                    .map(|(id, _)| id.clone());
                match target_id {
                    Some(target_id) => walk_module(workspace, mode, pins, state, &target_id)?,
                    None => {
                        return Err(ResolveError::UnresolvedImport(format!(
                            "Local import not found: {}",
                            path
                        ))
                        .into())
                    },
                }
            },
            ImportSpec::Registry { name, version, .. } => {
                state
                    .registry_requested
                    .entry(name.clone())
                    .or_default()
                    .insert(version.clone());

                if locked {
                    let lock_key = format!("registry:{}", name);
                    let entry = pin_entry(pins, &lock_key)?;
                    let pinned = get_str(entry, "pinned_version");
                    if pinned != Some(version.as_str()) {
                        return Err(ResolveError::Conflict(format!(
                            "Registry version mismatch for {}: requested {} but lock has {}",
                            name,
                            version,
                            pinned.unwrap_or("none")
                        ))
                        .into());
                    }
                }

                state.items.push(ResolvedItem {
                    key: format!("registry:{}@{}", name, version),
                    kind: ItemKind::Registry,
                    locked,
                    meta: BTreeMap::from([
                        ("name".to_string(), name.clone()),
                        ("version".to_string(), version.clone()),
                    ]),
                });
            },
            ImportSpec::Git { url, rev, .. } => {
                if locked {
                    let lock_key = format!("git:{}", url);
                    let entry = pin_entry(pins, &lock_key)?;
                    if get_str(entry, "commit").is_none_or(str::is_empty) {
                        return Err(ResolveError::UnresolvedImport(format!(
                            "Lock entry missing commit for {}",
                            lock_key
                        ))
                        .into());
                    }
                }

                let mut meta = BTreeMap::from([("url".to_string(), url.clone())]);
                if let Some(rev) = rev {
                    meta.insert("ref".to_string(), rev.clone());
                }
                state.items.push(ResolvedItem {
                    key: format!("git:{}#{}", url, rev.as_deref().unwrap_or("unknown")),
                    kind: ItemKind::Git,
                    locked,
                    meta,
                });
            },
            ImportSpec::Url { url, .. } => {
                if locked {
                    let lock_key = format!("url:{}", url);
                    let entry = pin_entry(pins, &lock_key)?;
                    if get_str(entry, "sha256").is_none_or(str::is_empty) {
                        return Err(ResolveError::UnresolvedImport(format!(
                            "Lock entry missing sha256 for {}",
                            lock_key
                        ))
                        .into());
                    }
                }

                state.items.push(ResolvedItem {
                    key: format!("url:{}", url),
                    kind: ItemKind::Url,
                    locked,
                    meta: BTreeMap::from([("url".to_string(), url.clone())]),
                });
            },
        }
    }

    // The module's own record comes after its full import subtree.
    state.items.push(ResolvedItem {
        key: format!("module:{}", spec.module_id),
        kind: ItemKind::Module,
        locked,
        meta: BTreeMap::from([
            ("module_id".to_string(), spec.module_id.clone()),
            ("file".to_string(), spec.file_path.display().to_string()),
        ]),
    });

    state.stack.pop();
    state.visited.insert(module_id.to_string());
    Ok(())
}

/// Full containment check for a local import: join to the workspace root,
/// normalize, and ensure the result stays under the root. This repeats the
/// loader's syntactic check with filesystem awareness -- only here is the
/// concrete root known, and only canonicalization catches symlink escapes.
///
/// A path without an extension gets the standard `.ptbl` appended, so both
/// `modules/auth.ptbl` and `modules/auth` are accepted.
fn resolve_local_path(workspace: &Workspace, rel_path: &str) -> Result<PathBuf> {
    let raw = rel_path.trim();
    if raw.is_empty() {
        return Err(ResolveError::UnresolvedImport(
            "Local import path must be a non-empty string".to_string(),
        )
        .into());
    }

    if is_os_absolute(raw) {
        return Err(ResolveError::PathTraversal(format!("Absolute path not allowed: {}", raw)).into());
    }

    let mut rel = PathBuf::from(raw);
    if rel.extension().is_none() {
        rel.set_extension(SPEC_EXTENSION);
    }

    let joined = workspace.root.join(&rel);
    let normalized = normalize_lexically(&joined);
    if !normalized.starts_with(&workspace.root) {
        return Err(ResolveError::PathTraversal(format!("Path traversal detected: {}", raw)).into());
    }

    // If the target exists, canonicalize to resolve symlinks and re-check
    // containment against the (already canonical) root.
    match normalized.canonicalize() {
        Ok(canonical) => {
            if !canonical.starts_with(&workspace.root) {
                return Err(
                    ResolveError::PathTraversal(format!("Path traversal detected: {}", raw)).into(),
                );
            }
            Ok(canonical)
        },
        Err(_) => Ok(normalized),
    }
}

/// Collapses `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// The lock's pin map. Absent or `null` means "no pins available"; any other
/// non-mapping shape is a fatal configuration defect.
fn lock_pins(workspace: &Workspace) -> Result<Mapping> {
    let Some(lock) = &workspace.lock else {
        return Ok(Mapping::new());
    };
    match get_value(lock, "resolved") {
        None | Some(Value::Null) => Ok(Mapping::new()),
        Some(Value::Mapping(resolved)) => Ok(resolved.clone()),
        Some(_) => bail!("lock.ptbl: resolved must be a mapping"),
    }
}

/// Looks up one pin entry; anything that is not a mapping counts as missing.
fn pin_entry<'a>(pins: &'a Mapping, lock_key: &str) -> Result<&'a Mapping, ResolveError> {
    get_value(pins, lock_key)
        .and_then(Value::as_mapping)
        .ok_or_else(|| {
            ResolveError::UnresolvedImport(format!("Missing lock entry for {}", lock_key))
        })
}

/// The app descriptor's entry modules, sorted case-insensitively so that
/// enumeration order never affects output.
fn entry_modules(workspace: &Workspace) -> Result<Vec<String>> {
    let entries = match get_value(&workspace.app, "entry_modules") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Sequence(entries)) => entries.as_slice(),
        Some(_) => bail!("app.ptbl: entry_modules must be a list of strings"),
    };

    let mut module_ids = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.as_str() {
            Some(id) => module_ids.push(id.to_string()),
            None => bail!("app.ptbl: entry_modules must be a list of strings"),
        }
    }
    module_ids.sort_by_key(|id| id.to_lowercase());
    Ok(module_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[test]
    fn mode_parses_and_displays() {
        assert_eq!(assert_ok!(Mode::from_str("dev")), Mode::Dev);
        assert_eq!(assert_ok!(Mode::from_str("repro")), Mode::Repro);
        assert_eq!(Mode::Repro.to_string(), "repro");

        let err = assert_err!(Mode::from_str("release"));
        assert!(err.to_string().contains("mode must be dev or repro"));
    }

    #[test]
    fn item_kinds_sort_in_canonical_string_order() {
        let mut kinds = vec![
            ItemKind::Url,
            ItemKind::Module,
            ItemKind::Registry,
            ItemKind::Git,
        ];
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![
            ItemKind::Git,
            ItemKind::Module,
            ItemKind::Registry,
            ItemKind::Url,
        ]);
    }

    #[test]
    fn lexical_normalization_collapses_dot_segments() {
        assert_eq!(
            normalize_lexically(Path::new("/ws/modules/./a/../b.ptbl")),
            PathBuf::from("/ws/modules/b.ptbl")
        );
        // Popping past the root stays at the filesystem root; containment
        // checks catch the escape.
        assert_eq!(
            normalize_lexically(Path::new("/ws/../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn resolved_items_serialize_for_downstream_tooling() {
        let item = ResolvedItem {
            key: "registry:foo@1.0.0".to_string(),
            kind: ItemKind::Registry,
            locked: true,
            meta: BTreeMap::from([
                ("name".to_string(), "foo".to_string()),
                ("version".to_string(), "1.0.0".to_string()),
            ]),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "registry");
        assert_eq!(json["locked"], true);
        assert_eq!(json["meta"]["name"], "foo");
    }
}
