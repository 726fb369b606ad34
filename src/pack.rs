//! Property packing, plus the minimal editor bridge the one-shot commands
//! (`pack`, `push`) use to talk to Studio without a full serve session.
//!
//! Packing asks the plugin for a snapshot that includes properties and
//! attributes, rebuilds the sourcemap shape from it while preserving the
//! existing `filePaths`, overlays the property data onto matching nodes,
//! and stamps the root with `_azul` metadata for later restoration.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::change_processor::SessionEvent;
use crate::message::{DaemonMessage, EditorMessage, Guid, InstanceData};
use crate::sourcemap::{self, PackMetadata, SourcemapNode};
use crate::tree::SyncTree;
use crate::web::{LiveServer, OutboundHandle, TransportError};

pub const PACK_VERSION: u32 = 1;

/// How long a snapshot request may take before the command fails.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PackError {
    #[error("timed out after {}s waiting for the editor snapshot", .0.as_secs())]
    SnapshotTimeout(Duration),

    #[error("the editor disconnected before answering")]
    EditorDisconnected,

    #[error("the transport shut down unexpectedly")]
    TransportClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A transport with no engine behind it: the caller drives the conversation
/// directly. Connecting does not auto-request a snapshot.
pub struct EditorBridge {
    session_receiver: Receiver<SessionEvent>,
    outbound: OutboundHandle,
}

impl EditorBridge {
    /// Binds the transport and serves it on a background thread. Fails fast
    /// when the port is taken.
    pub fn start(port: u16) -> Result<Self, PackError> {
        let (session_sender, session_receiver) = crossbeam_channel::unbounded();
        let outbound = OutboundHandle::new();

        LiveServer::new(port, session_sender, outbound.clone()).spawn()?;

        Ok(EditorBridge {
            session_receiver,
            outbound,
        })
    }

    /// Blocks until an editor connects.
    pub fn wait_for_connection(&self) -> Result<(), PackError> {
        loop {
            match self.session_receiver.recv() {
                Ok(SessionEvent::Connected) => return Ok(()),
                Ok(_) => continue,
                Err(_) => return Err(PackError::TransportClosed),
            }
        }
    }

    /// Issues a snapshot request and awaits the single `fullSnapshot`
    /// answer within `timeout`.
    pub fn request_snapshot(
        &self,
        include_properties: bool,
        scripts_and_descendants_only: bool,
        timeout: Duration,
    ) -> Result<Vec<InstanceData>, PackError> {
        self.outbound.send(DaemonMessage::RequestSnapshot {
            include_properties: Some(include_properties),
            scripts_and_descendants_only: Some(scripts_and_descendants_only),
        });

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PackError::SnapshotTimeout(timeout));
            }

            match self.session_receiver.recv_timeout(remaining) {
                Ok(SessionEvent::Message(EditorMessage::FullSnapshot { data })) => return Ok(data),
                Ok(SessionEvent::Disconnected) => return Err(PackError::EditorDisconnected),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(PackError::SnapshotTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(PackError::TransportClosed),
            }
        }
    }

    /// Fire-and-forget delivery of one message to the connected editor.
    pub fn send(&self, message: DaemonMessage) {
        self.outbound.send(message);
    }
}

/// Builds the packed sourcemap: the snapshot's shape, the previous map's
/// `filePaths`, the snapshot's properties and attributes, and an `_azul`
/// stamp.
pub fn merge_snapshot(
    snapshot: Vec<InstanceData>,
    previous: Option<&SourcemapNode>,
    mode: &str,
) -> SourcemapNode {
    let mut tree = SyncTree::new();
    tree.apply_full_snapshot(snapshot.clone());

    // filePaths restoration: guid-keyed first, then (path, className)
    // buckets consumed front to back so non-unique keys bind in document
    // order instead of double-binding.
    let mut paths_by_guid: HashMap<Guid, Vec<String>> = HashMap::new();
    let mut path_buckets: HashMap<(Vec<String>, String), VecDeque<Vec<String>>> = HashMap::new();
    if let Some(previous) = previous {
        for child in &previous.children {
            collect_file_paths(child, &mut Vec::new(), &mut paths_by_guid, &mut path_buckets);
        }
    }

    let mut root = sourcemap::generate_with(&tree, &mut |node| {
        if let Some(paths) = paths_by_guid.get(&node.guid) {
            return paths.clone();
        }
        path_buckets
            .get_mut(&(node.path.clone(), node.class_name.clone()))
            .and_then(|bucket| bucket.pop_front())
            .unwrap_or_default()
    });

    // Property overlay: guid-keyed first, then (path, className) with a
    // used-guid set so two same-key instances never share one data record.
    let data_by_guid: HashMap<&Guid, &InstanceData> = snapshot
        .iter()
        .map(|data| (&data.guid, data))
        .collect();
    let mut data_buckets: HashMap<(Vec<String>, &str), Vec<&InstanceData>> = HashMap::new();
    for data in &snapshot {
        data_buckets
            .entry((data.path.clone(), data.class_name.as_str()))
            .or_default()
            .push(data);
    }

    let mut used = HashSet::new();
    for child in &mut root.children {
        overlay_properties(
            child,
            &mut Vec::new(),
            &data_by_guid,
            &data_buckets,
            &mut used,
        );
    }

    root.azul = Some(PackMetadata {
        pack_version: PACK_VERSION,
        packed_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        mode: mode.to_owned(),
    });
    root
}

fn collect_file_paths(
    node: &SourcemapNode,
    prefix: &mut Vec<String>,
    by_guid: &mut HashMap<Guid, Vec<String>>,
    buckets: &mut HashMap<(Vec<String>, String), VecDeque<Vec<String>>>,
) {
    prefix.push(node.name.clone());

    if !node.file_paths.is_empty() {
        if let Some(guid) = &node.guid {
            by_guid.insert(guid.clone(), node.file_paths.clone());
        }
        buckets
            .entry((prefix.clone(), node.class_name.clone()))
            .or_default()
            .push_back(node.file_paths.clone());
    }

    for child in &node.children {
        collect_file_paths(child, prefix, by_guid, buckets);
    }
    prefix.pop();
}

fn overlay_properties(
    node: &mut SourcemapNode,
    prefix: &mut Vec<String>,
    by_guid: &HashMap<&Guid, &InstanceData>,
    buckets: &HashMap<(Vec<String>, &str), Vec<&InstanceData>>,
    used: &mut HashSet<Guid>,
) {
    prefix.push(node.name.clone());

    let data = node
        .guid
        .as_ref()
        .and_then(|guid| by_guid.get(guid).copied())
        .or_else(|| {
            buckets
                .get(&(prefix.clone(), node.class_name.as_str()))
                .and_then(|candidates| {
                    candidates
                        .iter()
                        .find(|candidate| !used.contains(&candidate.guid))
                        .copied()
                })
        });

    if let Some(data) = data {
        used.insert(data.guid.clone());
        node.properties = data.properties.clone();
        node.attributes = data.attributes.clone();
    }

    for child in &mut node.children {
        overlay_properties(child, prefix, by_guid, buckets, used);
    }
    prefix.pop();
}
