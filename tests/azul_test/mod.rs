//! Shared fixtures for the integration tests: an engine wired to a temp
//! directory, plus builders for the instance payloads the plugin would
//! send.

use std::path::PathBuf;

use tempfile::TempDir;

use libazul::{
    sourcemap, DaemonMessage, EditorMessage, EngineOptions, Guid, InstanceData, SessionEvent,
    SourcemapNode, SuppressedPaths, SyncEngine,
};

pub struct TestSession {
    pub dir: TempDir,
    pub engine: SyncEngine,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    pub fn with_options<F: FnOnce(&mut EngineOptions)>(tweak: F) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut options = EngineOptions {
            sync_dir: dir.path().join("sync"),
            sourcemap_path: dir.path().join("sourcemap.json"),
            script_extension: ".luau".to_owned(),
            suffix_module_scripts: false,
            delete_orphans_on_connect: false,
            request_snapshot_on_connect: true,
        };
        tweak(&mut options);

        let engine =
            SyncEngine::new(options, SuppressedPaths::new()).expect("failed to build engine");
        TestSession { dir, engine }
    }

    pub fn connect(&mut self) -> Vec<DaemonMessage> {
        self.engine.handle_session_event(SessionEvent::Connected)
    }

    pub fn send(&mut self, message: EditorMessage) -> Vec<DaemonMessage> {
        self.engine
            .handle_session_event(SessionEvent::Message(message))
    }

    pub fn sync_path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.dir.path().join("sync")
        } else {
            self.dir.path().join("sync").join(rel)
        }
    }

    pub fn sourcemap_path(&self) -> PathBuf {
        self.dir.path().join("sourcemap.json")
    }

    pub fn sourcemap(&self) -> SourcemapNode {
        sourcemap::load(&self.sourcemap_path()).expect("sourcemap should load")
    }
}

pub fn instance(guid: &str, class_name: &str, path: &[&str]) -> InstanceData {
    InstanceData {
        guid: Guid::from(guid),
        class_name: class_name.to_owned(),
        name: path.last().expect("non-empty path").to_string(),
        path: path.iter().map(|s| s.to_string()).collect(),
        parent_guid: None,
        source: None,
        properties: None,
        attributes: None,
    }
}

pub fn script(guid: &str, class_name: &str, path: &[&str], source: &str) -> InstanceData {
    let mut data = instance(guid, class_name, path);
    data.source = Some(source.to_owned());
    data
}

pub fn full_snapshot(instances: Vec<InstanceData>) -> EditorMessage {
    EditorMessage::FullSnapshot { data: instances }
}

pub fn updated(data: InstanceData) -> EditorMessage {
    EditorMessage::InstanceUpdated { data }
}

/// Walks a sourcemap by node names from the root (exclusive).
pub fn find_node<'a>(root: &'a SourcemapNode, path: &[&str]) -> Option<&'a SourcemapNode> {
    let mut current = root;
    for segment in path {
        current = current
            .children
            .iter()
            .find(|child| child.name == *segment)?;
    }
    Some(current)
}
