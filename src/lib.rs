pub mod cli;
pub mod logging;

pub mod build;
pub mod change_processor;
pub mod config;
pub mod fs_writer;
pub mod message;
mod multimap;
pub mod pack;
pub mod serve_session;
pub mod sourcemap;
pub mod tree;
pub mod watcher;
pub mod web;

pub use build::{instances_from_sourcemap, load_and_build, BuildError};
pub use change_processor::{
    ChangeProcessor, EngineOptions, SessionEvent, SessionState, SyncEngine,
};
pub use config::Config;
pub use fs_writer::{FileMapping, FsWriterError, ScriptWriter};
pub use message::{
    decode_editor_message, encode_daemon_message, DaemonMessage, EditorMessage, Guid,
    InstanceData, ProtocolError,
};
pub use pack::{merge_snapshot, EditorBridge, PackError, PACK_VERSION, SNAPSHOT_TIMEOUT};
pub use serve_session::{ServeSession, ServeSessionError};
pub use sourcemap::{
    PackMetadata, RegenerateRequested, SourcemapError, SourcemapNode, ValidationReport,
};
pub use tree::{is_script_class, SyncTree, TreeNode, TreeStats, UpdateReceipt};
pub use watcher::{SuppressedPaths, SyncWatcher, WatchEvent};
pub use web::{LiveServer, OutboundHandle, TransportError};
