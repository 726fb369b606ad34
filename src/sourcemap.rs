//! The Rojo-compatible `sourcemap.json` projection of the tree.
//!
//! The file supports three maintenance modes: full regeneration from the
//! tree, incremental subtree upsert, and path pruning. The incremental
//! operations return [`RegenerateRequested`] instead of partial results
//! whenever anything about the on-disk file surprises them; the coordinator
//! responds by regenerating the whole file from the tree, which is always
//! safe.

use std::{
    collections::HashSet,
    io::{self, BufWriter, Write as _},
    path::{Path, PathBuf},
    process,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_writer::ScriptWriter;
use crate::message::{Guid, JsonMap};
use crate::tree::{sibling_order, SyncTree, TreeNode};

pub const ROOT_NAME: &str = "Game";
pub const ROOT_CLASS_NAME: &str = "DataModel";

/// One node of the sourcemap tree. `guid` and the root-level `_azul` stamp
/// are Azul extensions over the Rojo format; `filePaths` entries are
/// forward-slashed and relative to the process working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcemapNode {
    pub name: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Guid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SourcemapNode>,
    #[serde(rename = "_azul", default, skip_serializing_if = "Option::is_none")]
    pub azul: Option<PackMetadata>,
}

/// Root metadata stamped by `pack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
    pub pack_version: u32,
    pub packed_at: String,
    pub mode: String,
}

impl SourcemapNode {
    pub fn empty_root() -> Self {
        SourcemapNode {
            name: ROOT_NAME.to_owned(),
            class_name: ROOT_CLASS_NAME.to_owned(),
            guid: None,
            file_paths: Vec::new(),
            properties: None,
            attributes: None,
            children: Vec::new(),
            azul: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourcemapError {
    #[error("failed to parse {path}: {source}")]
    Corrupted {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize sourcemap: {source}")]
    Serialize { source: serde_json::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An incremental update bailed out; the caller should regenerate the file
/// from the tree instead.
#[derive(Debug, Error)]
#[error("incremental sourcemap update could not be applied: {reason}")]
pub struct RegenerateRequested {
    reason: String,
}

impl RegenerateRequested {
    fn new<S: Into<String>>(reason: S) -> Self {
        RegenerateRequested {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Full reconstruction from the tree. Services become the sorted children
/// of the root; a visited set over guids breaks reference cycles, which
/// cannot occur while the tree invariants hold but are defended against for
/// malformed snapshots.
pub fn generate(tree: &SyncTree, writer: &ScriptWriter) -> SourcemapNode {
    generate_with(tree, &mut |node| file_paths_from_writer(writer, node))
}

/// Like [`generate`], with the `filePaths` of each node supplied by the
/// caller. Used by pack, which restores paths from the previous sourcemap
/// instead of a live writer mapping.
pub fn generate_with<F>(tree: &SyncTree, file_paths: &mut F) -> SourcemapNode
where
    F: FnMut(&TreeNode) -> Vec<String>,
{
    let mut visited = HashSet::new();
    let mut root = SourcemapNode::empty_root();
    root.children = tree
        .services()
        .into_iter()
        .filter_map(|service| build_node(tree, service, file_paths, &mut visited))
        .collect();
    root
}

/// Fresh emission of one subtree, sorted by (name, className, guid) at
/// every level.
pub fn build_subtree(tree: &SyncTree, writer: &ScriptWriter, node: &TreeNode) -> SourcemapNode {
    let mut visited = HashSet::new();
    build_node(
        tree,
        node,
        &mut |node| file_paths_from_writer(writer, node),
        &mut visited,
    )
    .unwrap_or_else(|| SourcemapNode {
        name: node.name.clone(),
        class_name: node.class_name.clone(),
        guid: Some(node.guid.clone()),
        file_paths: Vec::new(),
        properties: None,
        attributes: None,
        children: Vec::new(),
        azul: None,
    })
}

fn build_node<F>(
    tree: &SyncTree,
    node: &TreeNode,
    file_paths: &mut F,
    visited: &mut HashSet<Guid>,
) -> Option<SourcemapNode>
where
    F: FnMut(&TreeNode) -> Vec<String>,
{
    if !visited.insert(node.guid.clone()) {
        log::warn!(
            "Cycle detected at guid {} while generating the sourcemap; truncating",
            node.guid
        );
        return None;
    }

    let mut child_nodes: Vec<&TreeNode> = node
        .children
        .iter()
        .filter_map(|child| tree.get_node(child))
        .collect();
    child_nodes.sort_by(|a, b| sibling_order(a, b));

    let children = child_nodes
        .into_iter()
        .filter_map(|child| build_node(tree, child, file_paths, visited))
        .collect();

    Some(SourcemapNode {
        name: node.name.clone(),
        class_name: node.class_name.clone(),
        guid: Some(node.guid.clone()),
        file_paths: file_paths(node),
        properties: None,
        attributes: None,
        children,
        azul: None,
    })
}

fn file_paths_from_writer(writer: &ScriptWriter, node: &TreeNode) -> Vec<String> {
    match writer.mapping_for(&node.guid) {
        Some(mapping) => vec![display_file_path(&mapping.file_path)],
        None => Vec::new(),
    }
}

/// Renders a mapping path as the sourcemap expects it: forward slashes,
/// relative to the working directory.
pub fn display_file_path(path: &Path) -> String {
    let relative = if path.is_absolute() {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| pathdiff::diff_paths(path, cwd))
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    };

    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn load(path: &Path) -> Result<SourcemapNode, SourcemapError> {
    let contents = fs_err::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| SourcemapError::Corrupted {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write(root: &SourcemapNode, path: &Path) -> Result<(), SourcemapError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }

    let json =
        serde_json::to_string_pretty(root).map_err(|source| SourcemapError::Serialize { source })?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Inserts or replaces the subtree rooted at `guid` at its current location
/// in the on-disk sourcemap, pruning `old_path` first if the node moved.
///
/// Matching is guid-first; a guid-less entry with the same name and class
/// is adopted for compatibility with hand-edited files. `is_new` forces
/// append semantics so same-name siblings never merge.
pub fn upsert_subtree(
    guid: &Guid,
    tree: &SyncTree,
    writer: &ScriptWriter,
    output_path: &Path,
    old_path: Option<&[String]>,
    is_new: bool,
) -> Result<(), RegenerateRequested> {
    let node = tree.get_node(guid).ok_or_else(|| {
        RegenerateRequested::new(format!("instance {} is no longer in the tree", guid))
    })?;

    let mut root = match load(output_path) {
        Ok(root) => root,
        Err(SourcemapError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            SourcemapNode::empty_root()
        }
        Err(err) => return Err(RegenerateRequested::new(err.to_string())),
    };

    if let Some(old_path) = old_path {
        if old_path != node.path.as_slice() && !old_path.is_empty() {
            prune_in_root(&mut root, old_path, Some(&node.class_name), Some(guid));
        }
    }

    if node.parent.is_none() && node.path.len() > 1 {
        return Err(RegenerateRequested::new(format!(
            "instance {} has no resolved parent",
            guid
        )));
    }

    // Ancestor chain from service level down to the node's parent.
    let mut ancestors: Vec<&TreeNode> = Vec::new();
    let mut cursor = node.parent.as_ref().and_then(|parent| tree.get_node(parent));
    while let Some(ancestor) = cursor {
        if ancestor.guid.is_root() {
            break;
        }
        ancestors.push(ancestor);
        cursor = ancestor
            .parent
            .as_ref()
            .and_then(|parent| tree.get_node(parent));
    }
    ancestors.reverse();

    let subtree = build_subtree(tree, writer, node);

    let mut current = &mut root;
    for ancestor in ancestors {
        let position = find_child(&current.children, &ancestor.guid, &ancestor.name, &ancestor.class_name);
        let index = match position {
            Some(index) => index,
            None => {
                current.children.push(SourcemapNode {
                    name: ancestor.name.clone(),
                    class_name: ancestor.class_name.clone(),
                    guid: Some(ancestor.guid.clone()),
                    file_paths: Vec::new(),
                    properties: None,
                    attributes: None,
                    children: Vec::new(),
                    azul: None,
                });
                current.children.len() - 1
            }
        };
        current = &mut current.children[index];
    }

    let slot = if is_new {
        None
    } else {
        find_child(&current.children, guid, &subtree.name, &subtree.class_name)
    };

    match slot {
        Some(index) => current.children[index] = subtree,
        None => current.children.push(subtree),
    }

    write(&root, output_path).map_err(|err| RegenerateRequested::new(err.to_string()))
}

/// Removes the node addressed by `path` from the on-disk sourcemap.
/// Final-segment matching prefers guid, then class, then bare name; empty
/// file-less ancestors below service level are collapsed afterwards.
/// Returns whether anything was removed.
pub fn prune_path(
    path: &[String],
    output_path: &Path,
    target_class: Option<&str>,
    target_guid: Option<&Guid>,
) -> Result<bool, RegenerateRequested> {
    if path.is_empty() {
        return Err(RegenerateRequested::new("refusing to prune the root"));
    }

    let mut root = match load(output_path) {
        Ok(root) => root,
        Err(SourcemapError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(false);
        }
        Err(err) => return Err(RegenerateRequested::new(err.to_string())),
    };

    let removed = prune_in_root(&mut root, path, target_class, target_guid);
    if removed {
        write(&root, output_path).map_err(|err| RegenerateRequested::new(err.to_string()))?;
    }
    Ok(removed)
}

fn prune_in_root(
    root: &mut SourcemapNode,
    path: &[String],
    target_class: Option<&str>,
    target_guid: Option<&Guid>,
) -> bool {
    prune_recursive(root, path, 1, target_class, target_guid)
}

fn prune_recursive(
    parent: &mut SourcemapNode,
    path: &[String],
    depth: usize,
    target_class: Option<&str>,
    target_guid: Option<&Guid>,
) -> bool {
    let segment = &path[0];

    if path.len() == 1 {
        let index = target_guid
            .and_then(|guid| {
                parent
                    .children
                    .iter()
                    .position(|child| child.guid.as_ref() == Some(guid))
            })
            .or_else(|| {
                target_class.and_then(|class| {
                    parent
                        .children
                        .iter()
                        .position(|child| child.name == *segment && child.class_name == class)
                })
            })
            .or_else(|| {
                parent
                    .children
                    .iter()
                    .position(|child| child.name == *segment)
            });

        return match index {
            Some(index) => {
                parent.children.remove(index);
                true
            }
            None => false,
        };
    }

    let mut matched = None;
    for (index, child) in parent.children.iter_mut().enumerate() {
        if child.name != *segment {
            continue;
        }
        if prune_recursive(child, &path[1..], depth + 1, target_class, target_guid) {
            matched = Some(index);
            break;
        }
    }

    match matched {
        Some(index) => {
            let child = &parent.children[index];
            if depth > 1 && child.children.is_empty() && child.file_paths.is_empty() {
                parent.children.remove(index);
            }
            true
        }
        None => false,
    }
}

/// Reports every `filePaths` entry that does not exist on disk.
pub fn validate(root: &SourcemapNode) -> ValidationReport {
    let mut errors = Vec::new();
    validate_node(root, &mut Vec::new(), &mut errors);
    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

fn validate_node(node: &SourcemapNode, breadcrumbs: &mut Vec<String>, errors: &mut Vec<String>) {
    breadcrumbs.push(node.name.clone());
    for file_path in &node.file_paths {
        if !Path::new(file_path).exists() {
            errors.push(format!(
                "{}: file {} does not exist",
                breadcrumbs.join("."),
                file_path
            ));
        }
    }
    for child in &node.children {
        validate_node(child, breadcrumbs, errors);
    }
    breadcrumbs.pop();
}

fn find_child(
    children: &[SourcemapNode],
    guid: &Guid,
    name: &str,
    class_name: &str,
) -> Option<usize> {
    children
        .iter()
        .position(|child| child.guid.as_ref() == Some(guid))
        .or_else(|| {
            children.iter().position(|child| {
                child.guid.is_none() && child.name == name && child.class_name == class_name
            })
        })
}

/// Write-then-rename so watchers and LSPs never observe a partial file.
fn write_atomic(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("sourcemap"),
        process::id(),
        timestamp
    );
    let temp_path = parent.join(&temp_name);

    let mut file = BufWriter::new(fs_err::File::create(&temp_path)?);
    file.write_all(data)?;
    file.flush()?;
    file.into_inner()
        .map_err(|err| err.into_error())?
        .sync_all()?;

    std::fs::rename(&temp_path, target)?;
    Ok(())
}
