//! Loads a scene file into [`SceneMetricsStorage`].

use super::format::{self, RecordReader, SnapshotFrame};
use super::storage::SceneMetricsStorage;
use crate::error::ImportError;
use crate::tags::MemoryRegion;
use crate::thread::region_scope;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct SceneMetricsImporter {
    storage: SceneMetricsStorage,
    source: Option<PathBuf>,
}

impl SceneMetricsImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the loaded scene with the one at `path`.
    ///
    /// Storage is cleared first and stays empty if the import fails. A
    /// record that fails to decode is skipped with a warning; a stream that
    /// ends early aborts the import.
    pub fn import_memory_profile(&mut self, path: impl AsRef<Path>) -> Result<(), ImportError> {
        let path = path.as_ref();
        let _region = region_scope(MemoryRegion::Debug);

        self.close();
        match self.load(path) {
            Ok(()) => {
                self.source = Some(path.to_path_buf());
                tracing::info!(
                    path = %path.display(),
                    snapshots = self.storage.snapshot_count(),
                    skipped = self.storage.skipped_records(),
                    "memory profile imported"
                );
                Ok(())
            }
            Err(err) => {
                self.storage.reset();
                tracing::warn!(path = %path.display(), error = %err, "memory profile import failed");
                Err(err)
            }
        }
    }

    fn load(&mut self, path: &Path) -> Result<(), ImportError> {
        let bytes = fs::read(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ImportError::NotFound(path.to_path_buf()),
            _ => ImportError::Read {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let (records, expected) = format::split_trailer(&bytes)?;
        self.storage.initialize(expected);

        let mut reader = RecordReader::new(records);
        for index in 0..expected {
            let payload = match reader.next() {
                Some(payload) => payload?,
                None => {
                    return Err(ImportError::MissingSnapshots {
                        expected,
                        found: index,
                    })
                }
            };
            match bincode::deserialize::<SnapshotFrame>(payload) {
                Ok(frame) => self.storage.append(frame),
                Err(err) => {
                    tracing::warn!(record = index, error = %err, "skipping undecodable memory profile record");
                    self.storage.note_skipped();
                }
            }
        }

        if reader.remaining() > 0 {
            tracing::warn!(
                bytes = reader.remaining(),
                "memory profile has data past its last announced record"
            );
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.storage.reset();
        self.source = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn storage(&self) -> &SceneMetricsStorage {
        &self.storage
    }

    /// File the current scene was loaded from.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MemoryMetrics;
    use crate::record::{AllocationEvent, AllocationRecord};
    use crate::scene::format::{encode_frame, encode_trailer, SnapshotFrameRef};
    use crate::tags::AllocatorKind;
    use heapscope_core::memory::LinearArena;

    fn encoded_record(metrics: &mut MemoryMetrics, address: usize, size: usize) -> Vec<u8> {
        let record = AllocationRecord {
            address,
            size,
            region: MemoryRegion::Renderer,
            kind: AllocatorKind::Ring,
            thread: 5,
        };
        metrics.track_allocation(&record);
        let frame = SnapshotFrameRef {
            metrics: &*metrics,
            time_us: address as f64,
            event: AllocationEvent::from(&record),
            stacktrace: "0: render\n",
        };
        let mut scratch = LinearArena::new(256);
        encode_frame(&mut scratch, &frame).unwrap().to_vec()
    }

    fn write_scene(dir: &Path, parts: &[&[u8]], count: u64) -> PathBuf {
        let mut bytes = Vec::new();
        for part in parts {
            bytes.extend_from_slice(part);
        }
        bytes.extend(encode_trailer(count).unwrap());
        let path = dir.join("scene.memprofile");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn imports_hand_written_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = MemoryMetrics::new();
        let a = encoded_record(&mut metrics, 0x100, 32);
        let b = encoded_record(&mut metrics, 0x200, 64);
        let path = write_scene(dir.path(), &[&a, &b], 2);

        let mut importer = SceneMetricsImporter::new();
        importer.import_memory_profile(&path).unwrap();

        assert!(importer.is_loaded());
        assert_eq!(importer.source_path(), Some(path.as_path()));
        let storage = importer.storage();
        assert_eq!(storage.snapshot_count(), 2);
        assert_eq!(storage.global().usage, vec![32, 96]);
        assert_eq!(storage.allocator(AllocatorKind::Ring).unwrap().active, vec![1, 2]);
        assert_eq!(storage.thread(5).unwrap().total, vec![1, 2]);
        assert_eq!(storage.events()[1].address, 0x200);
        assert_eq!(storage.stacktraces()[0], "0: render\n");
        assert_eq!(storage.times_us(), &[256.0, 512.0]);
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = MemoryMetrics::new();
        let good = encoded_record(&mut metrics, 0x100, 32);
        let mut corrupt = bincode::serialize(&4u64).unwrap();
        corrupt.extend_from_slice(&[0xff; 4]);
        let path = write_scene(dir.path(), &[&corrupt, &good], 2);

        let mut importer = SceneMetricsImporter::new();
        importer.import_memory_profile(&path).unwrap();

        let storage = importer.storage();
        assert_eq!(storage.expected_snapshot_count(), 2);
        assert_eq!(storage.snapshot_count(), 1);
        assert_eq!(storage.skipped_records(), 1);
        assert_eq!(storage.global().usage, vec![32]);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut importer = SceneMetricsImporter::new();
        let err = importer
            .import_memory_profile(dir.path().join("nope.memprofile"))
            .unwrap_err();
        assert!(matches!(err, ImportError::NotFound(_)));
        assert!(!importer.is_loaded());
    }

    #[test]
    fn short_file_has_no_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.memprofile");
        fs::write(&path, [1u8, 2, 3]).unwrap();

        let mut importer = SceneMetricsImporter::new();
        let err = importer.import_memory_profile(&path).unwrap_err();
        assert!(matches!(err, ImportError::MissingTrailer { len: 3 }));
    }

    #[test]
    fn overstated_count_aborts_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = MemoryMetrics::new();
        let a = encoded_record(&mut metrics, 0x100, 32);
        let b = encoded_record(&mut metrics, 0x200, 64);

        let mut importer = SceneMetricsImporter::new();
        let good = write_scene(dir.path(), &[&a, &b], 2);
        importer.import_memory_profile(&good).unwrap();
        assert_eq!(importer.storage().snapshot_count(), 2);

        let bad = write_scene(dir.path(), &[&a, &b], 3);
        let err = importer.import_memory_profile(&bad).unwrap_err();
        assert!(matches!(err, ImportError::MissingSnapshots { expected: 3, found: 2 }));
        assert!(!importer.is_loaded());
        assert_eq!(importer.storage().snapshot_count(), 0);
    }

    #[test]
    fn truncated_record_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = MemoryMetrics::new();
        let a = encoded_record(&mut metrics, 0x100, 32);
        let path = write_scene(dir.path(), &[&a[..a.len() - 3]], 1);

        let mut importer = SceneMetricsImporter::new();
        let err = importer.import_memory_profile(&path).unwrap_err();
        assert!(matches!(err, ImportError::TruncatedRecord { offset: 0 }));
        assert_eq!(importer.storage().snapshot_count(), 0);
    }

    #[test]
    fn close_unloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scene(dir.path(), &[], 0);

        let mut importer = SceneMetricsImporter::new();
        importer.import_memory_profile(&path).unwrap();
        assert!(importer.is_loaded());
        assert_eq!(importer.storage().snapshot_count(), 0);

        importer.close();
        assert!(!importer.is_loaded());
    }
}
