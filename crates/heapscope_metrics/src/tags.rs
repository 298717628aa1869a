//! Tags attached to every allocation record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine subsystem an allocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryRegion {
    Renderer,
    Window,
    Assets,
    Ecs,
    Debug,
    Core,
    Unknown,
}

impl MemoryRegion {
    pub const ALL: [Self; 7] = [
        Self::Renderer,
        Self::Window,
        Self::Assets,
        Self::Ecs,
        Self::Debug,
        Self::Core,
        Self::Unknown,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Renderer => "Renderer",
            Self::Window => "Window",
            Self::Assets => "Assets",
            Self::Ecs => "ECS",
            Self::Debug => "Debug",
            Self::Core => "Core",
            Self::Unknown => "Unknown",
        }
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocation strategy that produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AllocatorKind {
    Stack,
    Ring,
    Frame,
    Linear,
    Pool,
    DoubleBuffered,
    Aligned,
    Global,
    Malloc,
}

impl AllocatorKind {
    pub const ALL: [Self; 9] = [
        Self::Stack,
        Self::Ring,
        Self::Frame,
        Self::Linear,
        Self::Pool,
        Self::DoubleBuffered,
        Self::Aligned,
        Self::Global,
        Self::Malloc,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Stack => "Stack",
            Self::Ring => "Ring",
            Self::Frame => "Frame",
            Self::Linear => "Linear",
            Self::Pool => "Pool",
            Self::DoubleBuffered => "DoubleBuffered",
            Self::Aligned => "Aligned",
            Self::Global => "Global",
            Self::Malloc => "Malloc",
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
