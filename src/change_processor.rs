//! The single mutation site of the whole daemon.
//!
//! [`SyncEngine`] is the synchronous dispatch core: it owns the tree, the
//! script writer, and the sourcemap path, and turns editor messages and
//! watcher events into filesystem and sourcemap effects plus outbound
//! messages. [`ChangeProcessor`] wraps the engine in a dedicated thread
//! that selects over the session and watcher channels, so every mutation is
//! serialized on one loop and nothing else ever touches the state.

use std::path::PathBuf;

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;

use crate::config::Config;
use crate::fs_writer::{FsWriterError, ScriptWriter};
use crate::message::{DaemonMessage, EditorMessage, Guid, InstanceData};
use crate::sourcemap;
use crate::tree::SyncTree;
use crate::watcher::{SuppressedPaths, WatchEvent};
use crate::web::OutboundHandle;

/// Transport-level happenings delivered to the engine alongside parsed
/// messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Message(EditorMessage),
}

/// Where the session currently stands with the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No editor has connected yet.
    Idle,
    /// An editor is connected; waiting for its first full snapshot.
    Priming,
    /// Snapshot applied; incremental events flow in both directions.
    Live,
    /// The editor went away. Tree and mappings are retained so a reconnect
    /// can re-prime cheaply.
    Disconnected,
}

/// The engine's slice of the user configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub sync_dir: PathBuf,
    pub sourcemap_path: PathBuf,
    pub script_extension: String,
    pub suffix_module_scripts: bool,
    pub delete_orphans_on_connect: bool,
    pub request_snapshot_on_connect: bool,
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        EngineOptions {
            sync_dir: config.sync_dir.clone(),
            sourcemap_path: config.sourcemap_path.clone(),
            script_extension: config.script_extension.clone(),
            suffix_module_scripts: config.suffix_module_scripts,
            delete_orphans_on_connect: config.delete_orphans_on_connect,
            request_snapshot_on_connect: config.request_snapshot_on_connect,
        }
    }
}

pub struct SyncEngine {
    tree: SyncTree,
    writer: ScriptWriter,
    sourcemap_path: PathBuf,
    state: SessionState,
    delete_orphans_on_connect: bool,
    request_snapshot_on_connect: bool,
    suppressed: SuppressedPaths,
}

impl SyncEngine {
    pub fn new(options: EngineOptions, suppressed: SuppressedPaths) -> Result<Self, FsWriterError> {
        let writer = ScriptWriter::new(
            options.sync_dir,
            options.script_extension,
            options.suffix_module_scripts,
            suppressed.clone(),
        )?;

        Ok(SyncEngine {
            tree: SyncTree::new(),
            writer,
            sourcemap_path: options.sourcemap_path,
            state: SessionState::Idle,
            delete_orphans_on_connect: options.delete_orphans_on_connect,
            request_snapshot_on_connect: options.request_snapshot_on_connect,
            suppressed,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tree(&self) -> &SyncTree {
        &self.tree
    }

    pub fn writer(&self) -> &ScriptWriter {
        &self.writer
    }

    pub fn sourcemap_path(&self) -> &std::path::Path {
        &self.sourcemap_path
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) -> Vec<DaemonMessage> {
        match event {
            SessionEvent::Connected => {
                log::info!("Editor connected");
                self.state = SessionState::Priming;
                if self.request_snapshot_on_connect {
                    vec![DaemonMessage::request_snapshot()]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::Disconnected => {
                log::info!("Editor disconnected; retaining tree for reconnect");
                self.state = SessionState::Disconnected;
                Vec::new()
            }
            SessionEvent::Message(message) => self.handle_editor_message(message),
        }
    }

    pub fn handle_editor_message(&mut self, message: EditorMessage) -> Vec<DaemonMessage> {
        match message {
            EditorMessage::FullSnapshot { data } => self.apply_full_snapshot(data),
            EditorMessage::InstanceUpdated { data } => self.apply_update(data),
            EditorMessage::InstanceDeleted { guid } => self.apply_delete(&guid),
            EditorMessage::ScriptSourceChanged { guid, source } => {
                self.apply_source_change(&guid, source)
            }
        }
        Vec::new()
    }

    pub fn handle_watch_event(&mut self, event: WatchEvent) -> Vec<DaemonMessage> {
        if self.suppressed.consume(event.path()) {
            log::trace!(
                "Discarding self-induced event for {}",
                event.path().display()
            );
            return Vec::new();
        }

        match event {
            WatchEvent::Changed(path) => {
                let Some(guid) = self.writer.guid_for_event_path(&path).cloned() else {
                    log::debug!("Change for unmapped path {}; ignoring", path.display());
                    return Vec::new();
                };

                let source = match fs_err::read_to_string(&path) {
                    Ok(source) => source,
                    Err(err) => {
                        log::error!("Failed to read {}: {}", path.display(), err);
                        return Vec::new();
                    }
                };

                self.tree.update_script_source(&guid, source.clone());
                log::debug!("Local edit of {} -> guid {}", path.display(), guid);
                vec![DaemonMessage::ScriptSourceChanged { guid, source }]
            }
            WatchEvent::Removed(path) => {
                let Some(guid) = self.writer.guid_for_event_path(&path).cloned() else {
                    log::debug!("Removal of unmapped path {}; ignoring", path.display());
                    return Vec::new();
                };

                let descendant_scripts: Vec<Guid> = self
                    .tree
                    .descendant_scripts(&guid)
                    .iter()
                    .map(|node| node.guid.clone())
                    .collect();
                let Some(removed) = self.tree.delete_instance(&guid) else {
                    return Vec::new();
                };

                // The files under a locally-deleted subtree are the user's
                // business; we only drop our mappings.
                for script_guid in &descendant_scripts {
                    let _ = self.writer.forget_mapping(script_guid);
                }

                if let Err(reason) = sourcemap::prune_path(
                    &removed.path,
                    &self.sourcemap_path,
                    Some(&removed.class_name),
                    Some(&removed.guid),
                ) {
                    log::debug!("{}; regenerating", reason);
                    self.regenerate_sourcemap();
                }

                log::info!("Local deletion of {} -> guid {}", path.display(), guid);
                vec![DaemonMessage::InstanceDeleted { guid }]
            }
            WatchEvent::Added(path) => {
                log::debug!(
                    "New path {} observed; instance creation flows from the editor",
                    path.display()
                );
                Vec::new()
            }
        }
    }

    /// Full resync: replace the tree, reproject every script, optionally
    /// sweep orphans, and regenerate the sourcemap from scratch.
    fn apply_full_snapshot(&mut self, data: Vec<InstanceData>) {
        self.tree.apply_full_snapshot(data);
        self.writer.clear_mappings();

        let written = self.writer.write_tree(self.tree.script_nodes());

        if self.delete_orphans_on_connect {
            let orphans = self.writer.orphan_files();
            for orphan in &orphans {
                log::info!("Removing orphaned file {}", orphan.display());
                let _ = self.writer.delete_file_path(orphan);
            }
            if !orphans.is_empty() {
                self.writer.cleanup_empty_directories();
            }
        }

        self.regenerate_sourcemap();

        let stats = self.tree.stats();
        log::info!(
            "Synced {} instances across {} services ({} scripts on disk)",
            stats.total_nodes,
            stats.services,
            written
        );
        self.state = SessionState::Live;
    }

    fn apply_update(&mut self, data: InstanceData) {
        let receipt = self.tree.update_instance(data);
        let guid = receipt.guid.clone();

        // A path change moves every descendant script's file, so reproject
        // the whole subtree; otherwise only the node itself (if a script)
        // needs rewriting.
        let script_guids: Vec<Guid> = if receipt.is_new || receipt.path_changed {
            self.tree
                .descendant_scripts(&guid)
                .iter()
                .map(|node| node.guid.clone())
                .collect()
        } else if self
            .tree
            .get_node(&guid)
            .map(|node| node.is_script())
            .unwrap_or(false)
        {
            vec![guid.clone()]
        } else {
            Vec::new()
        };

        for script_guid in &script_guids {
            let Some(node) = self.tree.get_node(script_guid).cloned() else {
                continue;
            };
            if let Err(err) = self.writer.write_script(&node) {
                log::error!("{}", err);
            }
        }

        let result = if receipt.is_new {
            sourcemap::upsert_subtree(
                &guid,
                &self.tree,
                &self.writer,
                &self.sourcemap_path,
                None,
                true,
            )
        } else if receipt.path_changed {
            sourcemap::upsert_subtree(
                &guid,
                &self.tree,
                &self.writer,
                &self.sourcemap_path,
                receipt.prev_path.as_deref(),
                false,
            )
        } else if !script_guids.is_empty() {
            // Source-only refresh; the entry's location is unchanged but its
            // filePath may have been (re)assigned.
            sourcemap::upsert_subtree(
                &guid,
                &self.tree,
                &self.writer,
                &self.sourcemap_path,
                None,
                false,
            )
        } else {
            Ok(())
        };

        if let Err(reason) = result {
            log::debug!("{}; regenerating", reason);
            self.regenerate_sourcemap();
        }
    }

    fn apply_delete(&mut self, guid: &Guid) {
        let script_guids: Vec<Guid> = self
            .tree
            .descendant_scripts(guid)
            .iter()
            .map(|node| node.guid.clone())
            .collect();

        let Some(removed) = self.tree.delete_instance(guid) else {
            log::debug!("Deletion of unknown guid {}; ignoring", guid);
            return;
        };

        for script_guid in &script_guids {
            let _ = self.writer.delete_script(script_guid);
        }

        if let Err(reason) = sourcemap::prune_path(
            &removed.path,
            &self.sourcemap_path,
            Some(&removed.class_name),
            Some(&removed.guid),
        ) {
            log::debug!("{}; regenerating", reason);
            self.regenerate_sourcemap();
        }
    }

    fn apply_source_change(&mut self, guid: &Guid, source: String) {
        if !self.tree.update_script_source(guid, source) {
            log::warn!("Source change for unknown guid {}; ignoring", guid);
            return;
        }

        let Some(node) = self.tree.get_node(guid).cloned() else {
            return;
        };
        if let Err(err) = self.writer.write_script(&node) {
            log::error!("{}", err);
        }
    }

    /// Rebuilds `sourcemap.json` from the tree. Always safe; used directly
    /// after snapshots and as the fallback whenever an incremental update
    /// bails out.
    pub fn regenerate_sourcemap(&self) {
        let root = sourcemap::generate(&self.tree, &self.writer);
        if let Err(err) = sourcemap::write(&root, &self.sourcemap_path) {
            log::error!("Failed to write sourcemap: {}", err);
        }
    }
}

/// Runs a [`SyncEngine`] on its own thread, fed by the transport's session
/// channel and the watcher's event channel.
///
/// Consumers communicate with this object purely via channels; it expects
/// to be the only writer to the engine's state.
pub struct ChangeProcessor {
    /// Signaled before drop so the job thread winds down instead of
    /// blocking the join forever.
    shutdown_sender: Sender<()>,

    /// Joined on drop.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl ChangeProcessor {
    pub fn start(
        mut engine: SyncEngine,
        session_receiver: Receiver<SessionEvent>,
        watch_receiver: Receiver<WatchEvent>,
        outbound: OutboundHandle,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);

        let job_thread = jod_thread::Builder::new()
            .name("ChangeProcessor thread".to_owned())
            .spawn(move || {
                log::trace!("ChangeProcessor thread started");

                loop {
                    select! {
                        recv(session_receiver) -> event => {
                            for message in engine.handle_session_event(event?) {
                                outbound.send(message);
                            }
                        },
                        recv(watch_receiver) -> event => {
                            for message in engine.handle_watch_event(event?) {
                                outbound.send(message);
                            }
                        },
                        recv(shutdown_receiver) -> _ => {
                            log::trace!("ChangeProcessor shutdown signal received");
                            return Ok(());
                        },
                    }
                }
            })
            .expect("Could not start ChangeProcessor thread");

        Self {
            shutdown_sender,
            job_thread,
        }
    }
}

impl Drop for ChangeProcessor {
    fn drop(&mut self) {
        let _ = self.shutdown_sender.send(());
    }
}
