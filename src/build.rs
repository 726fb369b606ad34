//! One-shot construction of an `InstanceData` stream from `sourcemap.json`,
//! used by the `build` and `push` commands to apply a local tree to the
//! editor without entering live sync.
//!
//! Nodes missing a guid are given freshly minted ones for the duration of
//! the stream; the minted identities are deliberately not written back to
//! the sourcemap or persisted editor-side.

use std::{io, path::Path, path::PathBuf};

use thiserror::Error;

use crate::message::{Guid, InstanceData};
use crate::sourcemap::{self, SourcemapError, SourcemapNode};
use crate::tree::is_script_class;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read script source {path}: {source}")]
    ReadSource { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Sourcemap(#[from] SourcemapError),
}

/// Loads a sourcemap file and flattens it into an instance stream.
pub fn load_and_build(sourcemap_path: &Path) -> Result<Vec<InstanceData>, BuildError> {
    let root = sourcemap::load(sourcemap_path)?;
    instances_from_sourcemap(&root)
}

/// Flattens a sourcemap tree into `InstanceData`, parents before children
/// (sorted by path length), reading script sources from the referenced
/// files.
pub fn instances_from_sourcemap(root: &SourcemapNode) -> Result<Vec<InstanceData>, BuildError> {
    let mut instances = Vec::new();
    for service in &root.children {
        collect(service, &mut Vec::new(), None, &mut instances)?;
    }

    instances.sort_by_key(|data| data.path.len());
    Ok(instances)
}

fn collect(
    node: &SourcemapNode,
    prefix: &mut Vec<String>,
    parent: Option<&Guid>,
    out: &mut Vec<InstanceData>,
) -> Result<(), BuildError> {
    let guid = node.guid.clone().unwrap_or_else(Guid::mint);
    prefix.push(node.name.clone());

    let source = if is_script_class(&node.class_name) {
        match node.file_paths.first() {
            Some(file_path) => Some(fs_err::read_to_string(file_path).map_err(|source| {
                BuildError::ReadSource {
                    path: PathBuf::from(file_path),
                    source,
                }
            })?),
            None => None,
        }
    } else {
        None
    };

    out.push(InstanceData {
        guid: guid.clone(),
        class_name: node.class_name.clone(),
        name: node.name.clone(),
        path: prefix.clone(),
        parent_guid: parent.cloned(),
        source,
        properties: node.properties.clone(),
        attributes: node.attributes.clone(),
    });

    for child in &node.children {
        collect(child, prefix, Some(&guid), out)?;
    }

    prefix.pop();
    Ok(())
}
