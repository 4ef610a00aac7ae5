// Copyright (c) The PTBL Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generic PTBL document reading: bytes on disk in, string-keyed YAML mapping
//! out. No schema interpretation happens here.

use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use std::{fs, path::Path};

/// Reads the document at `path` and requires a mapping at the top level.
///
/// An empty or `null` document is treated as the empty mapping. A missing
/// file and a malformed document are distinct errors, both naming the path.
pub fn read_document(path: &Path) -> Result<Mapping> {
    if !path.exists() {
        bail!("Missing file: {}", path.display());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read PTBL document: {}", path.display()))?;
    parse_document(&contents, path)
}

fn parse_document(contents: &str, path: &Path) -> Result<Mapping> {
    if contents.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(contents)
        .with_context(|| format!("Malformed PTBL document: {}", path.display()))?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        _ => bail!(
            "PTBL document must be a mapping at top level: {}",
            path.display()
        ),
    }
}

/// Looks up `key` in a mapping. PTBL documents are keyed by plain strings.
pub(crate) fn get_value<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping.get(&Value::String(key.to_string()))
}

/// Looks up `key` and requires a string value.
pub(crate) fn get_str<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a str> {
    get_value(mapping, key).and_then(Value::as_str)
}
