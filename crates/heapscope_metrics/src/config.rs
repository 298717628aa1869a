//! Tracker settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for an [`AllocationTracker`](crate::AllocationTracker) and its scene recorder.
///
/// Every field has a default, so partial JSON is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory scene files are written under.
    pub profile_root: PathBuf,
    pub file_extension: String,
    /// Resolve a call stack for every recorded event. Expensive.
    pub capture_call_stacks: bool,
    pub stack_skip_frames: usize,
    pub max_stack_frames: usize,
    /// Initial size of the record encoding buffer; grows on demand.
    pub scratch_arena_capacity: usize,
    pub max_scene_name_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            profile_root: PathBuf::from("profiles/memory"),
            file_extension: "memprofile".to_string(),
            capture_call_stacks: true,
            stack_skip_frames: 0,
            max_stack_frames: 32,
            scratch_arena_capacity: 4096,
            max_scene_name_len: 90,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
