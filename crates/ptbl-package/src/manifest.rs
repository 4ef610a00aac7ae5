// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed import and module specs.
//!
//! Raw import mappings are duck-typed YAML and must be treated as untrusted
//! input. This module validates them exactly once into [`ImportSpec`], a
//! closed tagged union; nothing downstream re-inspects the loose mapping.

use crate::{
    document::{get_str, get_value},
    error::ResolveError,
};
use anyhow::{bail, Result};
use serde_yaml::{Mapping, Value};
use std::path::{Component, Path, PathBuf};

/// One entry of a module's `imports` list, validated and immutable.
///
/// Exactly one variant per recognized source kind. Each variant retains the
/// original raw mapping for pass-through and debugging.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportSpec {
    /// A module elsewhere in the same workspace, by relative path.
    Local { path: String, raw: Mapping },

    /// A versioned registry package.
    Registry {
        name: String,
        version: String,
        raw: Mapping,
    },

    /// A git repository. The manifest field is spelled `ref`; `rev` is its
    /// Rust-side name.
    Git {
        url: String,
        rev: Option<String>,
        commit: Option<String>,
        raw: Mapping,
    },

    /// An arbitrary URL.
    Url { url: String, raw: Mapping },
}

impl ImportSpec {
    /// The source tag this spec was parsed from.
    pub fn source(&self) -> &'static str {
        match self {
            ImportSpec::Local { .. } => "local",
            ImportSpec::Registry { .. } => "registry",
            ImportSpec::Git { .. } => "git",
            ImportSpec::Url { .. } => "url",
        }
    }

    /// The original raw mapping this spec was parsed from.
    pub fn raw(&self) -> &Mapping {
        match self {
            ImportSpec::Local { raw, .. }
            | ImportSpec::Registry { raw, .. }
            | ImportSpec::Git { raw, .. }
            | ImportSpec::Url { raw, .. } => raw,
        }
    }

    /// Fixed deterministic ordering key: (source, path, name, version, url,
    /// ref, commit), empty string for absent fields. Two structurally equal
    /// import lists sort identically no matter their textual order on disk.
    fn sort_key(&self) -> (&str, &str, &str, &str, &str, &str, &str) {
        match self {
            ImportSpec::Local { path, .. } => ("local", path, "", "", "", "", ""),
            ImportSpec::Registry { name, version, .. } => {
                ("registry", "", name, version, "", "", "")
            },
            ImportSpec::Git {
                url, rev, commit, ..
            } => (
                "git",
                "",
                "",
                "",
                url,
                rev.as_deref().unwrap_or(""),
                commit.as_deref().unwrap_or(""),
            ),
            ImportSpec::Url { url, .. } => ("url", "", "", "", url, "", ""),
        }
    }
}

/// One module spec file: unique id, source location, pre-sorted imports.
/// Created once at load time and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub module_id: String,
    pub file_path: PathBuf,
    pub imports: Vec<ImportSpec>,
}

/// Parses one raw import entry into an [`ImportSpec`].
///
/// The `source` tag must be exactly one of the four recognized strings
/// (`RESOLVE_SOURCE_UNSUPPORTED` otherwise). Required fields per variant must
/// be present, non-empty strings; violations are fatal shape errors, except
/// local path validation which is the security-relevant
/// `RESOLVE_PATH_TRAVERSAL` condition. No I/O happens here.
pub fn parse_import(entry: &Value) -> Result<ImportSpec> {
    let Some(mapping) = entry.as_mapping() else {
        bail!("import entry must be a mapping");
    };
    let raw = mapping.clone();

    let source = get_str(mapping, "source").unwrap_or("");
    match source {
        "local" => {
            let path = require_str(mapping, "local", "path")?;
            validate_local_relpath(&path)?;
            Ok(ImportSpec::Local { path, raw })
        },
        "registry" => {
            let name = require_str(mapping, "registry", "name")?;
            let version = require_str(mapping, "registry", "version")?;
            Ok(ImportSpec::Registry { name, version, raw })
        },
        "git" => {
            let url = require_str(mapping, "git", "url")?;
            let rev = optional_str(mapping, "git", "ref")?;
            let commit = optional_str(mapping, "git", "commit")?;
            Ok(ImportSpec::Git {
                url,
                rev,
                commit,
                raw,
            })
        },
        "url" => {
            let url = require_str(mapping, "url", "url")?;
            Ok(ImportSpec::Url { url, raw })
        },
        other => Err(ResolveError::SourceUnsupported(format!(
            "import.source must be one of local, git, registry, url; got '{}'",
            other
        ))
        .into()),
    }
}

/// Builds a [`ModuleSpec`] from an already-read module document.
///
/// `imports` may be absent or `null` (both mean "no imports"); any other
/// non-list shape is fatal. Imports are re-sorted by the fixed key so the
/// in-memory order never depends on declaration order.
pub fn parse_module_document(path: &Path, doc: &Mapping) -> Result<ModuleSpec> {
    let module_id = match get_str(doc, "module_id") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => bail!(
            "{}: module_id must be a non-empty string",
            path.display()
        ),
    };

    let entries = match get_value(doc, "imports") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Sequence(entries)) => entries.as_slice(),
        Some(_) => bail!("{}: imports must be a list", path.display()),
    };

    let mut imports = entries.iter().map(parse_import).collect::<Result<Vec<_>>>()?;
    imports.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    Ok(ModuleSpec {
        module_id,
        file_path: path.to_path_buf(),
        imports,
    })
}

fn require_str(mapping: &Mapping, source: &str, field: &str) -> Result<String> {
    match get_str(mapping, field) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => bail!(
            "{} import requires non-empty string '{}'",
            source,
            field
        ),
    }
}

fn optional_str(mapping: &Mapping, source: &str, field: &str) -> Result<Option<String>> {
    match get_value(mapping, field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => bail!(
            "{} import '{}' must be string if present",
            source,
            field
        ),
    }
}

/// Syntactic validation of a local import path, independent of filesystem
/// state. Necessary but not sufficient: the resolver repeats the check
/// against the concrete workspace root, which is the only place symlink and
/// normalization escapes can be caught.
fn validate_local_relpath(rel_path: &str) -> Result<(), ResolveError> {
    if rel_path.trim().is_empty() {
        return Err(ResolveError::PathTraversal(
            "Empty local import path not allowed".to_string(),
        ));
    }

    if is_os_absolute(rel_path) {
        return Err(ResolveError::PathTraversal(format!(
            "Absolute local import path not allowed: {}",
            rel_path
        )));
    }

    // Split on both separator styles: a Windows-style path does not
    // decompose through std::path on Unix.
    if rel_path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ResolveError::PathTraversal(format!(
            "Path traversal segment '..' not allowed: {}",
            rel_path
        )));
    }

    Ok(())
}

/// True for any OS-absolute form: Unix roots, Windows drive letters, UNC
/// shares. The host OS only recognizes its own absolute syntax, so the
/// foreign forms are checked textually.
pub(crate) fn is_os_absolute(path: &str) -> bool {
    let p = Path::new(path);
    if p.is_absolute() || matches!(p.components().next(), Some(Component::RootDir)) {
        return true;
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    fn import(yaml: &str) -> Result<ImportSpec> {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        parse_import(&value)
    }

    fn rule_id(err: &anyhow::Error) -> &'static str {
        err.downcast_ref::<ResolveError>()
            .expect("expected a ResolveError")
            .rule_id()
    }

    #[test]
    fn parses_all_four_source_kinds() {
        let local = assert_ok!(import("{source: local, path: modules/auth.ptbl}"));
        assert_eq!(local.source(), "local");

        let registry = assert_ok!(import("{source: registry, name: foo, version: 1.0.0}"));
        assert!(matches!(
            registry,
            ImportSpec::Registry { ref name, ref version, .. }
                if name == "foo" && version == "1.0.0"
        ));

        let git = assert_ok!(import(
            "{source: git, url: 'https://example.com/r.git', ref: main}"
        ));
        assert!(matches!(
            git,
            ImportSpec::Git { ref rev, ref commit, .. }
                if rev.as_deref() == Some("main") && commit.is_none()
        ));

        let url = assert_ok!(import("{source: url, url: 'https://example.com/a.tgz'}"));
        assert_eq!(url.source(), "url");
    }

    #[test]
    fn retains_the_raw_mapping() {
        let spec = assert_ok!(import("{source: registry, name: foo, version: 1.0.0, extra: x}"));
        assert_eq!(get_str(spec.raw(), "extra"), Some("x"));
    }

    #[test]
    fn unknown_source_is_unsupported() {
        let err = assert_err!(import("{source: ftp, path: somewhere}"));
        assert_eq!(rule_id(&err), "RESOLVE_SOURCE_UNSUPPORTED");

        let err = assert_err!(import("{path: modules/auth.ptbl}"));
        assert_eq!(rule_id(&err), "RESOLVE_SOURCE_UNSUPPORTED");
    }

    #[test]
    fn non_mapping_entry_is_rejected() {
        let value: Value = serde_yaml::from_str("just-a-string").unwrap();
        assert_err!(parse_import(&value));
    }

    #[test]
    fn missing_required_fields_are_shape_errors() {
        let err = assert_err!(import("{source: local}"));
        assert!(err.to_string().contains("non-empty string 'path'"));

        assert_err!(import("{source: registry, name: foo}"));
        assert_err!(import("{source: registry, version: 1.0.0}"));
        assert_err!(import("{source: registry, name: '', version: 1.0.0}"));
        assert_err!(import("{source: git}"));
        assert_err!(import("{source: url}"));
    }

    #[test]
    fn git_ref_and_commit_must_be_strings_when_present() {
        let err = assert_err!(import(
            "{source: git, url: 'https://example.com/r.git', ref: [a, b]}"
        ));
        assert!(err.to_string().contains("'ref' must be string"));

        let err = assert_err!(import(
            "{source: git, url: 'https://example.com/r.git', commit: 7}"
        ));
        assert!(err.to_string().contains("'commit' must be string"));
    }

    #[test]
    fn local_paths_are_syntactically_validated() {
        for bad in [
            "/etc/passwd",
            "\\\\server\\share\\x",
            "C:\\windows\\x",
            "../outside.ptbl",
            "modules/../../outside.ptbl",
            "..\\outside.ptbl",
            "   ",
        ] {
            let err = assert_err!(import(&format!("{{source: local, path: '{}'}}", bad)));
            assert_eq!(rule_id(&err), "RESOLVE_PATH_TRAVERSAL", "path: {}", bad);
        }

        // An interior dot segment is fine; only '..' is traversal.
        assert_ok!(import("{source: local, path: modules/./auth.ptbl}"));
    }

    #[test]
    fn reparsing_the_same_mapping_is_idempotent() {
        let value: Value =
            serde_yaml::from_str("{source: git, url: 'https://example.com/r.git', ref: main}")
                .unwrap();
        assert_eq!(
            assert_ok!(parse_import(&value)),
            assert_ok!(parse_import(&value))
        );
    }

    #[test]
    fn module_imports_are_sorted_by_the_fixed_key() {
        let doc: Mapping = serde_yaml::from_str(
            r#"
module_id: m
imports:
  - {source: url, url: 'https://example.com/z.tgz'}
  - {source: registry, name: bar, version: 2.0.0}
  - {source: local, path: modules/b.ptbl}
  - {source: registry, name: bar, version: 1.0.0}
  - {source: local, path: modules/a.ptbl}
  - {source: git, url: 'https://example.com/r.git'}
"#,
        )
        .unwrap();
        let spec = assert_ok!(parse_module_document(Path::new("m.ptbl"), &doc));
        let keys: Vec<String> = spec
            .imports
            .iter()
            .map(|i| {
                let k = i.sort_key();
                format!("{}:{}{}{}{}", k.0, k.1, k.2, k.3, k.4)
            })
            .collect();
        assert_eq!(keys, vec![
            "git:https://example.com/r.git",
            "local:modules/a.ptbl",
            "local:modules/b.ptbl",
            "registry:bar1.0.0",
            "registry:bar2.0.0",
            "url:https://example.com/z.tgz",
        ]);
    }

    #[test]
    fn module_id_is_required_and_non_empty() {
        let doc: Mapping = serde_yaml::from_str("imports: []").unwrap();
        assert_err!(parse_module_document(Path::new("m.ptbl"), &doc));

        let doc: Mapping = serde_yaml::from_str("module_id: ''").unwrap();
        assert_err!(parse_module_document(Path::new("m.ptbl"), &doc));
    }

    #[test]
    fn imports_may_be_absent_or_null_but_not_scalar() {
        let doc: Mapping = serde_yaml::from_str("module_id: m").unwrap();
        assert!(assert_ok!(parse_module_document(Path::new("m.ptbl"), &doc))
            .imports
            .is_empty());

        let doc: Mapping = serde_yaml::from_str("module_id: m\nimports: null").unwrap();
        assert!(assert_ok!(parse_module_document(Path::new("m.ptbl"), &doc))
            .imports
            .is_empty());

        let doc: Mapping = serde_yaml::from_str("module_id: m\nimports: nope").unwrap();
        let err = assert_err!(parse_module_document(Path::new("m.ptbl"), &doc));
        assert!(err.to_string().contains("imports must be a list"));
    }
}
