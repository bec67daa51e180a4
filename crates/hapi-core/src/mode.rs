//! Session modes and their fingerprints.
//!
//! A mode is the configuration an instruction was composed under. The queue
//! only batches instructions whose modes hash identically, so the hash must be
//! a pure function of the value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Permission level the agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
    #[serde(rename = "read-only")]
    ReadOnly,
    #[serde(rename = "safe-yolo")]
    SafeYolo,
    Yolo,
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
            Self::ReadOnly => "read-only",
            Self::SafeYolo => "safe-yolo",
            Self::Yolo => "yolo",
        };
        f.write_str(name)
    }
}

/// Full configuration in effect for a queued instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMode {
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
}

impl EnhancedMode {
    pub fn new(permission_mode: PermissionMode) -> Self {
        Self {
            permission_mode,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// SHA-256 hex fingerprint of a mode's canonical JSON encoding.
///
/// `serde_json` maps keep keys sorted, so equal modes always encode (and
/// therefore hash) identically.
pub fn hash_mode<M: Serialize>(mode: &M) -> String {
    let canonical = serde_json::to_value(mode)
        .map(|value| value.to_string())
        .unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
