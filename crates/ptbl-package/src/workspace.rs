// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

//! Workspace discovery and loading.
//!
//! The loader is a scoped, one-shot acquisition: it reads every descriptor
//! under the root up front and returns an immutable [`Workspace`] snapshot.
//! No file handles are retained; the resolver performs no further I/O beyond
//! containment checks on local import paths.

use crate::{
    document::read_document,
    layout::{WorkspaceLayout, SPEC_EXTENSION},
    manifest::{parse_module_document, ModuleSpec},
};
use anyhow::{bail, Context, Result};
use serde_yaml::Mapping;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Immutable snapshot of a PTBL workspace on disk.
///
/// Safe to share read-only across any number of concurrent resolutions; the
/// resolver never mutates it.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Canonicalized workspace root.
    pub root: PathBuf,
    pub app_path: PathBuf,
    pub lock_path: Option<PathBuf>,
    pub module_paths: Vec<PathBuf>,
    pub integration_paths: Vec<PathBuf>,

    pub app: Mapping,
    pub lock: Option<Mapping>,
    /// Module specs keyed by their unique `module_id`.
    pub modules: BTreeMap<String, ModuleSpec>,
    /// Integration descriptors keyed by file stem, opaque at this layer.
    pub integrations: BTreeMap<String, Mapping>,
}

/// Loads the workspace rooted at `root`.
///
/// The app descriptor is required; the lock file is optional (its absence
/// only matters if repro-mode resolution is requested later). A duplicate
/// `module_id` across module files is a workspace-integrity defect and fails
/// the load.
pub fn load_workspace(root: impl AsRef<Path>) -> Result<Workspace> {
    let root = root
        .as_ref()
        .canonicalize()
        .with_context(|| format!("Invalid workspace root: {}", root.as_ref().display()))?;

    let app_path = root.join(WorkspaceLayout::App.path());
    let lock_path = root.join(WorkspaceLayout::Lock.path());
    let module_paths = sorted_spec_files(&root.join(WorkspaceLayout::Modules.path()))?;
    let integration_paths = sorted_spec_files(&root.join(WorkspaceLayout::Integrations.path()))?;

    let app = read_document(&app_path)?;
    let lock = if lock_path.exists() {
        Some(read_document(&lock_path)?)
    } else {
        None
    };

    let mut modules = BTreeMap::new();
    for path in &module_paths {
        let doc = read_document(path)?;
        // Canonicalized so the resolver can match local import targets by
        // exact path even when a module file is a symlink.
        let canonical = path
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize: {}", path.display()))?;
        let spec = parse_module_document(&canonical, &doc)?;
        if modules.contains_key(&spec.module_id) {
            bail!(
                "Duplicate module_id '{}' in {}",
                spec.module_id,
                path.display()
            );
        }
        modules.insert(spec.module_id.clone(), spec);
    }

    let mut integrations = BTreeMap::new();
    for path in &integration_paths {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        integrations.insert(stem, read_document(path)?);
    }

    debug!(
        root = %root.display(),
        modules = modules.len(),
        integrations = integrations.len(),
        has_lock = lock.is_some(),
        "loaded workspace"
    );

    Ok(Workspace {
        root,
        app_path,
        lock_path: lock_path.exists().then_some(lock_path),
        module_paths,
        integration_paths,
        app,
        lock,
        modules,
        integrations,
    })
}

/// Spec files directly under `dir`, sorted case-insensitively by path for
/// deterministic discovery. A missing directory yields the empty list.
fn sorted_spec_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to scan directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SPEC_EXTENSION) {
            files.push(path);
        }
    }
    files.sort_by_key(|path| path.to_string_lossy().to_lowercase());
    Ok(files)
}
