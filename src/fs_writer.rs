//! Projects script nodes onto disk under the sync directory and owns the
//! guid ↔ file-path mapping.
//!
//! The mapping is authoritative over the layout: when a node's derived path
//! changes, the old file is unlinked (and newly-empty directories pruned)
//! before the new file is written. Exactly one guid owns any given path;
//! collisions between same-name siblings are broken by appending a guid
//! prefix to the file stem rather than ever merging two scripts into one
//! file.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use walkdir::WalkDir;

use crate::message::Guid;
use crate::tree::TreeNode;
use crate::watcher::SuppressedPaths;

/// Characters that are unsafe in file names on at least one supported
/// platform, replaced by `_` when projecting instance names.
const UNSAFE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub guid: Guid,
    /// The script's on-disk location, rooted at the sync directory (so it is
    /// relative to the working directory whenever the sync directory is).
    pub file_path: PathBuf,
    pub class_name: String,
}

#[derive(Debug, Error)]
pub enum FsWriterError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

pub struct ScriptWriter {
    base_dir: PathBuf,
    /// Canonicalized base, used to translate the absolute paths the watcher
    /// reports back into mapping keys.
    abs_base: PathBuf,
    script_extension: String,
    suffix_module_scripts: bool,
    by_guid: HashMap<Guid, FileMapping>,
    /// Keys are relative to `base_dir`.
    by_rel: HashMap<PathBuf, Guid>,
    suppressed: SuppressedPaths,
}

impl ScriptWriter {
    pub fn new(
        base_dir: PathBuf,
        script_extension: String,
        suffix_module_scripts: bool,
        suppressed: SuppressedPaths,
    ) -> Result<Self, FsWriterError> {
        fs_err::create_dir_all(&base_dir).map_err(|source| FsWriterError::CreateDir {
            path: base_dir.clone(),
            source,
        })?;
        let abs_base = std::fs::canonicalize(&base_dir).unwrap_or_else(|_| base_dir.clone());

        Ok(ScriptWriter {
            base_dir,
            abs_base,
            script_extension,
            suffix_module_scripts,
            by_guid: HashMap::new(),
            by_rel: HashMap::new(),
            suppressed,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Derives the on-disk location for a script node, relative to the sync
    /// directory. A script named after its parent folder becomes that
    /// folder's `init` file; a path already claimed by another guid gets a
    /// guid-prefix suffix on the stem, stable for this node.
    pub fn rel_path_for(&self, node: &TreeNode) -> PathBuf {
        let mut dir = PathBuf::new();
        for segment in node.path.iter().rev().skip(1).rev() {
            dir.push(sanitize_segment(segment));
        }

        let parent_segment = node.path.len().checked_sub(2).map(|i| &node.path[i]);
        let stem = if parent_segment == Some(&node.name) {
            "init".to_owned()
        } else {
            let mut stem = sanitize_segment(&node.name);
            if self.suffix_module_scripts && node.class_name == "ModuleScript" {
                stem.push_str(".module");
            }
            stem
        };

        let primary = dir.join(format!("{}{}", stem, self.script_extension));
        match self.by_rel.get(&primary) {
            Some(owner) if owner != &node.guid => dir.join(format!(
                "{}__{}{}",
                stem,
                node.guid.short_prefix(),
                self.script_extension
            )),
            _ => primary,
        }
    }

    /// Writes one script node, moving its file first if the derived path
    /// changed. On failure the mapping is left untouched so the next event
    /// retries from known state.
    pub fn write_script(&mut self, node: &TreeNode) -> Result<FileMapping, FsWriterError> {
        let rel = self.rel_path_for(node);

        let existing_path = self
            .by_guid
            .get(&node.guid)
            .map(|mapping| mapping.file_path.clone());
        if let Some(existing_path) = existing_path {
            let existing_rel = self.rel_of(&existing_path);
            if existing_rel != rel {
                log::debug!("Moving {} -> {}", existing_rel.display(), rel.display());
                self.remove_rel(&existing_rel, false);
            }
        }

        let target = self.base_dir.join(&rel);
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent).map_err(|source| FsWriterError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        self.suppressed.expect_write(&target);
        if let Err(source) = fs_err::write(&target, node.source.as_deref().unwrap_or("")) {
            self.suppressed.consume(&target);
            return Err(FsWriterError::Write {
                path: target,
                source,
            });
        }

        let mapping = FileMapping {
            guid: node.guid.clone(),
            file_path: target,
            class_name: node.class_name.clone(),
        };
        self.by_rel.insert(rel, node.guid.clone());
        self.by_guid.insert(node.guid.clone(), mapping.clone());
        Ok(mapping)
    }

    /// Removes a script's file and mapping. No-op for unknown guids. Empty
    /// intermediate directories are pruned, but service-level directories
    /// are structural and stay.
    pub fn delete_script(&mut self, guid: &Guid) -> Option<FileMapping> {
        let mapping = self.by_guid.remove(guid)?;
        let rel = self.rel_of(&mapping.file_path);
        self.remove_rel(&rel, true);
        Some(mapping)
    }

    /// Forgets a mapping without touching disk, for files the user already
    /// deleted out from under us.
    pub fn forget_mapping(&mut self, guid: &Guid) -> Option<FileMapping> {
        let mapping = self.by_guid.remove(guid)?;
        let rel = self.rel_of(&mapping.file_path);
        self.by_rel.remove(&rel);
        Some(mapping)
    }

    /// Removes a stray file and whatever mapping pointed at it.
    pub fn delete_file_path(&mut self, file_path: &Path) -> Option<Guid> {
        let rel = self.rel_of(file_path);
        let guid = self.by_rel.get(&rel).cloned();
        if let Some(guid) = &guid {
            self.by_guid.remove(guid);
        }
        self.remove_rel(&rel, true);
        guid
    }

    /// Bulk projection after a full snapshot. Failures are logged per file
    /// and the rest of the tree still lands.
    pub fn write_tree<'a, I: IntoIterator<Item = &'a TreeNode>>(&mut self, nodes: I) -> usize {
        let mut written = 0;
        for node in nodes {
            if !node.is_script() {
                continue;
            }
            match self.write_script(node) {
                Ok(_) => written += 1,
                Err(err) => log::error!("{}", err),
            }
        }
        written
    }

    pub fn mapping_for(&self, guid: &Guid) -> Option<&FileMapping> {
        self.by_guid.get(guid)
    }

    pub fn clear_mappings(&mut self) {
        self.by_guid.clear();
        self.by_rel.clear();
    }

    /// Resolves a watcher-reported absolute path back to the guid that owns
    /// it, if any.
    pub fn guid_for_event_path(&self, event_path: &Path) -> Option<&Guid> {
        let rel = event_path
            .strip_prefix(&self.abs_base)
            .or_else(|_| event_path.strip_prefix(&self.base_dir))
            .ok()?;
        self.by_rel.get(rel)
    }

    /// Files under the sync directory with the script extension that no
    /// mapping claims.
    pub fn orphan_files(&self) -> Vec<PathBuf> {
        let mut orphans = Vec::new();
        for entry in WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(&self.script_extension) {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.base_dir) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if !self.by_rel.contains_key(&rel) {
                orphans.push(self.base_dir.join(rel));
            }
        }
        orphans
    }

    /// Depth-first removal of every empty directory strictly inside the
    /// base.
    pub fn cleanup_empty_directories(&self) {
        let mut dirs: Vec<(usize, PathBuf)> = WalkDir::new(&self.base_dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| (entry.depth(), entry.path().to_path_buf()))
            .collect();

        dirs.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, dir) in dirs {
            // Fails (and is skipped) for any directory that still has
            // contents.
            let _ = std::fs::remove_dir(&dir);
        }
    }

    fn rel_of(&self, file_path: &Path) -> PathBuf {
        file_path
            .strip_prefix(&self.base_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file_path.to_path_buf())
    }

    /// Unlinks one mapped file and prunes newly-empty ancestor directories.
    /// `preserve_service_dirs` stops the pruning above service level, which
    /// is the behavior for deletions; moves prune all the way to the base.
    fn remove_rel(&mut self, rel: &Path, preserve_service_dirs: bool) {
        self.by_rel.remove(rel);

        let target = self.base_dir.join(rel);
        self.suppressed.expect_write(&target);
        match fs_err::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.suppressed.consume(&target);
            }
            Err(err) => {
                self.suppressed.consume(&target);
                log::error!(
                    "{}",
                    FsWriterError::Remove {
                        path: target.clone(),
                        source: err,
                    }
                );
                return;
            }
        }

        let mut current = rel.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            if preserve_service_dirs && dir.components().count() == 1 {
                break;
            }
            let abs = self.base_dir.join(dir);
            let is_empty = match std::fs::read_dir(&abs) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !is_empty {
                break;
            }
            let _ = fs_err::remove_dir(&abs);
            current = dir.parent();
        }
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment.replace(UNSAFE_NAME_CHARS, "_")
}
