//! Memory profiling scenes.
//!
//! While a scene is active every allocation event is appended to a binary
//! scene file together with the metrics as they stood after the event:
//!
//! ```text
//! [payload_len: u64 LE][payload]     one per event
//! ...
//! [snapshot_count: u64 LE]           trailer, last 8 bytes
//! ```
//!
//! `payload` is the bincode encoding of the metrics snapshot, the event time
//! in microseconds since the scene began, the [`AllocationEvent`](crate::AllocationEvent)
//! and the captured call stack. The length prefix lets the importer skip a
//! record that fails to decode without losing the rest of the stream.

mod format;
mod importer;
mod recorder;
mod storage;

pub use importer::SceneMetricsImporter;
pub use recorder::{scene_file_path, SceneSummary};
pub use storage::{SceneMetricsStorage, SeriesSet};

pub(crate) use recorder::SceneRecorder;
