// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

/// Extension shared by every PTBL spec file in a workspace.
pub const SPEC_EXTENSION: &str = "ptbl";

/// The fixed on-disk layout of a PTBL workspace, relative to its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceLayout {
    App,
    Lock,
    Modules,
    Integrations,
}

impl WorkspaceLayout {
    pub fn path(self) -> &'static Path {
        Path::new(match self {
            WorkspaceLayout::App => "app.ptbl",
            WorkspaceLayout::Lock => "lock.ptbl",
            WorkspaceLayout::Modules => "modules",
            WorkspaceLayout::Integrations => "integrations",
        })
    }
}
