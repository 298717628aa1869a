//! Call-stack capture for scene records.

use std::fmt::Write;

/// Symbol prefixes belonging to the capture path itself.
const INTERNAL_FRAMES: &[&str] = &[
    "backtrace::",
    "heapscope_metrics::stacktrace::",
    "heapscope_metrics::scene::",
    "heapscope_metrics::tracker::AllocationTracker",
    "heapscope_metrics::hook::",
    "heapscope_metrics::thread::",
];

/// Captures the calling thread's stack, one demangled function name per line
/// (`"<index>: <name>\n"`).
///
/// Frames from the capture machinery are dropped first, then `skip` more,
/// then at most `max_frames` are kept. Symbol hashes, addresses and source
/// locations are omitted. Frames that fail to resolve are skipped.
pub fn capture(skip: usize, max_frames: usize) -> String {
    let mut out = String::new();
    if max_frames == 0 {
        return out;
    }

    let mut skipped = 0usize;
    let mut kept = 0usize;
    backtrace::trace(|frame| {
        let mut name = None;
        backtrace::resolve_frame(frame, |symbol| {
            if name.is_none() {
                name = symbol.name().map(|symbol_name| format!("{symbol_name:#}"));
            }
        });

        let Some(name) = name else {
            return true;
        };
        if is_internal(&name) {
            return true;
        }
        if skipped < skip {
            skipped += 1;
            return true;
        }

        let _ = writeln!(out, "{kept}: {name}");
        kept += 1;
        kept < max_frames
    });
    out
}

fn is_internal(name: &str) -> bool {
    let name = name.trim_start_matches('<');
    INTERNAL_FRAMES.iter().any(|prefix| name.starts_with(prefix))
}
