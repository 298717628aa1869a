//! Streams allocation events of the active scene to disk.

use super::format::{self, SnapshotFrameRef};
use crate::aggregator::MemoryMetrics;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::record::{AllocationEvent, AllocationRecord};
use crate::stacktrace;
use allocator_api2::alloc::Allocator;
use chrono::{Local, NaiveDateTime};
use heapscope_core::memory::LinearArena;
use heapscope_core::time::SceneClock;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// What a finished scene left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSummary {
    pub name: String,
    pub path: PathBuf,
    pub snapshot_count: u64,
}

struct ActiveScene {
    name: String,
    path: PathBuf,
    clock: SceneClock,
    snapshot_count: u64,
    file: BufWriter<File>,
    /// Set after the first failed write; the rest of the scene is dropped.
    failed: bool,
}

impl ActiveScene {
    fn finish(&mut self) -> io::Result<()> {
        let trailer = format::encode_trailer(self.snapshot_count).map_err(io::Error::other)?;
        self.file.write_all(&trailer)?;
        self.file.flush()
    }

    fn summary(&self) -> SceneSummary {
        SceneSummary {
            name: self.name.clone(),
            path: self.path.clone(),
            snapshot_count: self.snapshot_count,
        }
    }
}

/// Scene state machine owned by the tracker. Only ever touched under the
/// tracker's write lock.
pub(crate) struct SceneRecorder {
    config: TrackerConfig,
    scene: Option<ActiveScene>,
    scratch: LinearArena,
}

impl SceneRecorder {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            config: config.clone(),
            scene: None,
            scratch: LinearArena::new(config.scratch_arena_capacity),
        }
    }

    /// Pays one-time costs up front: creates the profile directory and
    /// resolves one call stack so symbol tables are loaded before the first
    /// scene.
    pub fn warm_up(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.config.profile_root)?;
        if self.config.capture_call_stacks {
            let _ = stacktrace::capture(0, 1);
        }
        Ok(())
    }

    pub fn is_scene_active(&self) -> bool {
        self.scene.is_some()
    }

    /// Events recorded so far in the active scene.
    pub fn snapshot_count(&self) -> u64 {
        self.scene.as_ref().map_or(0, |scene| scene.snapshot_count)
    }

    pub fn begin_scene(&mut self, name: &str) -> Result<PathBuf, TrackerError> {
        if let Some(stale) = &self.scene {
            tracing::error!(
                active = %stale.name,
                requested = name,
                "memory profiling scene already active; closing it first"
            );
            self.end_scene();
        }

        let path = unused_path(scene_file_path(
            &self.config.profile_root,
            name,
            &self.config.file_extension,
            self.config.max_scene_name_len,
            Local::now().naive_local(),
        ));
        let file = create_scene_file(&path).map_err(|source| TrackerError::SceneFile {
            path: path.clone(),
            source,
        })?;

        tracing::info!(scene = name, path = %path.display(), "memory profiling scene started");
        self.scene = Some(ActiveScene {
            name: name.to_string(),
            path: path.clone(),
            clock: SceneClock::new(),
            snapshot_count: 0,
            file: BufWriter::new(file),
            failed: false,
        });
        Ok(path)
    }

    /// Writes the trailer and closes the file. `None` if no scene was active.
    pub fn end_scene(&mut self) -> Option<SceneSummary> {
        let mut scene = self.scene.take()?;
        if let Err(err) = scene.finish() {
            tracing::warn!(scene = %scene.name, error = %err, "failed to finalize memory profile");
        }

        let summary = scene.summary();
        tracing::info!(
            scene = %summary.name,
            snapshots = summary.snapshot_count,
            "memory profiling scene ended"
        );
        Some(summary)
    }

    /// Appends one record for `record` with the metrics as they are now.
    pub fn record_snapshot<A: Allocator + Clone>(
        &mut self,
        metrics: &MemoryMetrics<A>,
        record: &AllocationRecord,
    ) {
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        if scene.failed {
            return;
        }

        let stacktrace = if self.config.capture_call_stacks {
            stacktrace::capture(self.config.stack_skip_frames, self.config.max_stack_frames)
        } else {
            String::new()
        };
        let frame = SnapshotFrameRef {
            metrics,
            time_us: scene.clock.elapsed_micros(),
            event: AllocationEvent::from(record),
            stacktrace: &stacktrace,
        };

        let written = format::encode_frame(&mut self.scratch, &frame)
            .map_err(io::Error::other)
            .and_then(|bytes| scene.file.write_all(bytes));
        match written {
            Ok(()) => scene.snapshot_count += 1,
            Err(err) => {
                scene.failed = true;
                tracing::warn!(
                    scene = %scene.name,
                    error = %err,
                    "failed to write memory profile record; dropping the rest of the scene"
                );
            }
        }
    }
}

/// `<root>/<YYYY-MM>/Day-<DD>/MemoryProfile_<scene>_<HH-MM-SS>.<extension>`
///
/// The scene name is cut to `max_name_len` characters and anything that is
/// not alphanumeric, `-` or `_` becomes `_`.
pub fn scene_file_path(
    root: &Path,
    scene_name: &str,
    extension: &str,
    max_name_len: usize,
    now: NaiveDateTime,
) -> PathBuf {
    let name: String = scene_name
        .chars()
        .take(max_name_len)
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    let mut file_name = format!("MemoryProfile_{name}_{}", now.format("%H-%M-%S"));
    if !extension.is_empty() {
        file_name.push('.');
        file_name.push_str(extension);
    }

    root.join(now.format("%Y-%m").to_string())
        .join(now.format("Day-%d").to_string())
        .join(file_name)
}

/// Appends `_1`, `_2`, ... to the file stem until the path is free.
fn unused_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|ext| ext.to_string_lossy().into_owned());

    let mut n = 1u32;
    loop {
        let file_name = match &extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = path.with_file_name(file_name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn create_scene_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}
