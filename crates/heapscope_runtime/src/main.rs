//! Heapscope Runtime
//!
//! Installs the tracking global allocator, runs a few simulated frames with
//! region-tagged work while recording a memory profiling scene, then imports
//! the scene back and logs what it contains.

use anyhow::{Context, Result};
use heapscope_core::events::FrameEvents;
use heapscope_metrics::{
    region_scope, AllocationTracker, AllocatorKind, MemoryRegion, RegionAllocator,
    SceneMetricsImporter, TrackerConfig, TrackingAllocator,
};
use std::alloc::System;
use std::path::Path;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator::new(System);

const CONFIG_ENV: &str = "HEAPSCOPE_CONFIG";
const DEMO_FRAMES: usize = 5;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Heapscope v{}", heapscope_core::VERSION);
    let config = load_config()?;

    let frames = Arc::new(FrameEvents::new());
    let tracker = AllocationTracker::new(config);
    GLOBAL.attach(tracker.clone())?;
    tracker.init(&frames);

    let scene = match tracker.begin_scene("RuntimeDemo") {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::warn!(error = %err, "continuing without a scene file");
            None
        }
    };

    run_frames(&tracker, &frames);

    tracker.end_scene();
    if let Some(path) = scene {
        summarize_scene(&path)?;
    }

    tracker.shutdown();
    Ok(())
}

/// Reads `TrackerConfig` from the JSON file named by `HEAPSCOPE_CONFIG`.
fn load_config() -> Result<TrackerConfig> {
    let Some(path) = std::env::var_os(CONFIG_ENV) else {
        tracing::info!("{CONFIG_ENV} not set, using default tracker settings");
        return Ok(TrackerConfig::default());
    };

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read tracker config {}", Path::new(&path).display()))?;
    let config = TrackerConfig::from_json(&json)
        .with_context(|| format!("invalid tracker config {}", Path::new(&path).display()))?;
    tracing::info!(profile_root = %config.profile_root.display(), "loaded tracker config");
    Ok(config)
}

/// Simulated frame loop: asset streaming, component storage churn and a
/// renderer-owned vertex buffer.
fn run_frames(tracker: &Arc<AllocationTracker>, frames: &FrameEvents) {
    let mut vertices = allocator_api2::vec::Vec::new_in(RegionAllocator::new(
        tracker.clone(),
        MemoryRegion::Renderer,
    ));
    let mut textures: Vec<Vec<u8>> = Vec::new();

    for frame in 0..DEMO_FRAMES {
        {
            let _region = region_scope(MemoryRegion::Assets);
            textures.push(vec![0u8; 16 * 1024 * (frame + 1)]);
        }
        {
            let _region = region_scope(MemoryRegion::Ecs);
            let positions: Vec<[f32; 3]> = (0..256).map(|i| [i as f32, 0.0, 0.0]).collect();
            let total: f32 = positions.iter().map(|p| p[0]).sum();
            tracing::trace!(frame, total, "component pass");
        }
        vertices.extend((0..1024u32).map(|i| i + frame as u32));

        let snapshot = tracker.metrics_snapshot();
        tracing::info!(
            frame,
            live_bytes = snapshot.current_bytes,
            frame_bytes = snapshot.frame.allocated_bytes,
            frame_allocations = snapshot.frame.allocation_count,
            renderer_bytes = snapshot.region(MemoryRegion::Renderer).current_bytes,
            "frame done"
        );
        frames.publish_new_frame();
    }

    let _region = region_scope(MemoryRegion::Assets);
    textures.clear();
    textures.shrink_to_fit();
    drop(vertices);
}

fn summarize_scene(path: &Path) -> Result<()> {
    let mut importer = SceneMetricsImporter::new();
    importer
        .import_memory_profile(path)
        .with_context(|| format!("failed to import {}", path.display()))?;

    let storage = importer.storage();
    let peak = storage.global().peak.last().copied().unwrap_or(0);
    tracing::info!(
        path = %path.display(),
        snapshots = storage.snapshot_count(),
        skipped = storage.skipped_records(),
        peak_bytes = peak,
        "scene summary"
    );
    for (region, series) in storage.regions() {
        tracing::info!(
            region = %region,
            peak_bytes = series.peak.last().copied().unwrap_or(0),
            allocations = series.total.last().copied().unwrap_or(0),
            "region"
        );
    }
    if let Some(global) = storage.allocator(AllocatorKind::Global) {
        tracing::info!(
            allocations = global.total.last().copied().unwrap_or(0),
            "global allocator events"
        );
    }

    importer.close();
    Ok(())
}
