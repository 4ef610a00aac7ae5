// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic loading and resolution of PTBL workspaces.
//!
//! A workspace is a directory of declarative `.ptbl` spec files: an app
//! descriptor naming entry modules, module specs with import lists (local,
//! registry, git, or url sources), optional integration descriptors, and an
//! optional lock file. [`load_workspace`] turns the files into an immutable
//! [`Workspace`] snapshot; [`resolve_workspace`] walks the entry modules'
//! import graph depth-first and produces a deduplicated, canonically ordered
//! list of [`ResolvedItem`]s.
//!
//! Two modes are supported: [`Mode::Dev`] resolves without pin enforcement,
//! while [`Mode::Repro`] fails closed unless every non-local import matches a
//! lock entry exactly. Resolution never fetches anything -- it only records
//! what is needed and how it should be verified.
//!
//! Resolution of a fixed workspace and mode is exactly deterministic:
//! repeated calls yield identical output regardless of the on-disk
//! declaration order of entry modules or imports.

pub mod document;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod resolution;
pub mod workspace;

pub use error::ResolveError;
pub use manifest::{ImportSpec, ModuleSpec};
pub use resolution::{resolve_workspace, ItemKind, Mode, ResolvedItem};
pub use workspace::{load_workspace, Workspace};
