//! Wire types exchanged with the Studio plugin.
//!
//! Every frame is one UTF-8 JSON object carrying a `type` discriminator.
//! Unknown fields are ignored; unknown `type`s are skipped by the caller;
//! a frame that fails to parse at all is a protocol violation and the
//! transport closes the connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Stable 128-bit identity of an editor instance, carried as a lowercase
/// hex string with no dashes. The plugin persists it on the instance via
/// the `AzulSyncGUID` attribute so identity survives Studio restarts.
///
/// The synthetic DataModel root uses the reserved value `"root"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Guid(value.into())
    }

    /// The reserved guid of the synthetic DataModel root.
    pub fn root() -> Self {
        Guid("root".to_owned())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "root"
    }

    /// Mints a fresh identity for instances that arrive without one
    /// (sourcemap-only builds).
    pub fn mint() -> Self {
        Guid(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used to disambiguate file name collisions.
    pub fn short_prefix(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Guid(value.to_owned())
    }
}

/// One instance as described by the plugin. `path` is the segment list from
/// the root service down to (and including) the instance's own name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceData {
    pub guid: Guid,
    pub class_name: String,
    pub name: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<Guid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<JsonMap>,
}

/// Messages the plugin sends us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditorMessage {
    FullSnapshot {
        data: Vec<InstanceData>,
    },
    InstanceUpdated {
        data: InstanceData,
    },
    InstanceDeleted {
        guid: Guid,
    },
    ScriptSourceChanged {
        guid: Guid,
        source: String,
    },
}

/// Messages we send the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DaemonMessage {
    RequestSnapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include_properties: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scripts_and_descendants_only: Option<bool>,
    },
    BuildSnapshot {
        data: Vec<InstanceData>,
    },
    ScriptSourceChanged {
        guid: Guid,
        source: String,
    },
    InstanceDeleted {
        guid: Guid,
    },
}

impl DaemonMessage {
    /// A bare snapshot request with no options set.
    pub fn request_snapshot() -> Self {
        DaemonMessage::RequestSnapshot {
            include_properties: None,
            scripts_and_descendants_only: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {source}")]
    MalformedFrame {
        #[from]
        source: serde_json::Error,
    },

    #[error("frame is missing its 'type' discriminator")]
    MissingType,

    #[error("invalid payload for '{message_type}' message: {source}")]
    InvalidPayload {
        message_type: String,
        source: serde_json::Error,
    },
}

const EDITOR_MESSAGE_TYPES: &[&str] = &[
    "fullSnapshot",
    "instanceUpdated",
    "instanceDeleted",
    "scriptSourceChanged",
];

/// Decodes one inbound frame. Returns `Ok(None)` for a structurally valid
/// frame whose `type` we don't recognize (the caller logs and moves on) and
/// `Err` for anything malformed (the caller closes the connection).
pub fn decode_editor_message(frame: &str) -> Result<Option<EditorMessage>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    let message_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();

    if !EDITOR_MESSAGE_TYPES.contains(&message_type.as_str()) {
        return Ok(None);
    }

    match serde_json::from_value(value) {
        Ok(message) => Ok(Some(message)),
        Err(source) => Err(ProtocolError::InvalidPayload {
            message_type,
            source,
        }),
    }
}

pub fn encode_daemon_message(message: &DaemonMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
