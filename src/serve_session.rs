//! Ownership root for one live session: the engine, its processor thread,
//! the filesystem watcher, and the channels that stitch them to the
//! transport.

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::change_processor::{ChangeProcessor, EngineOptions, SessionEvent, SyncEngine};
use crate::config::Config;
use crate::fs_writer::FsWriterError;
use crate::watcher::{SuppressedPaths, SyncWatcher};
use crate::web::OutboundHandle;

/// Contains all of the state for one serve session. Nothing here is
/// specific to the WebSocket transport: the session exposes a channel
/// endpoint for inbound events and an outbound handle, and any frontend
/// that speaks those is equivalent.
pub struct ServeSession {
    /// Owns the engine and is the only writer to it. Dropped first so the
    /// processor thread unblocks before its channels hang up.
    #[allow(unused)]
    change_processor: ChangeProcessor,

    /// Held for its side effects; dropping it stops the filesystem watch.
    #[allow(unused)]
    watcher: SyncWatcher,

    session_sender: Sender<SessionEvent>,
    outbound: OutboundHandle,
    start_time: Instant,
    port: u16,
}

#[derive(Debug, Error)]
pub enum ServeSessionError {
    #[error(transparent)]
    Fs(#[from] FsWriterError),

    #[error("failed to start the file watcher: {source}")]
    Watch {
        #[from]
        source: notify::Error,
    },
}

impl ServeSession {
    pub fn new(config: &Config) -> Result<Self, ServeSessionError> {
        log::trace!(
            "Starting serve session over {} (sourcemap at {})",
            config.sync_dir.display(),
            config.sourcemap_path.display()
        );

        let suppressed = SuppressedPaths::new();
        let engine = SyncEngine::new(EngineOptions::from(config), suppressed)?;

        let watcher = SyncWatcher::new(
            engine.writer().base_dir(),
            Duration::from_millis(config.file_watch_debounce),
        )?;

        let (session_sender, session_receiver) = crossbeam_channel::unbounded();
        let outbound = OutboundHandle::new();

        log::trace!("Starting ChangeProcessor");
        let change_processor = ChangeProcessor::start(
            engine,
            session_receiver,
            watcher.event_receiver(),
            outbound.clone(),
        );

        Ok(ServeSession {
            change_processor,
            watcher,
            session_sender,
            outbound,
            start_time: Instant::now(),
            port: config.port,
        })
    }

    /// The endpoint the transport feeds parsed messages and peer lifecycle
    /// events into.
    pub fn session_sender(&self) -> Sender<SessionEvent> {
        self.session_sender.clone()
    }

    pub fn outbound(&self) -> OutboundHandle {
        self.outbound.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }
}
