//! Memory pressure sampling for the editor's status line.
//!
//! Reads `/proc/meminfo` and reports used memory as a percentage, counting
//! buffers and page cache as free, the way the status display expects.

use tracing::warn;

/// Used-memory percentage, or `None` off-Linux / on parse trouble.
pub fn memory_used_percent() -> Option<f32> {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(text) => parse_meminfo(&text),
        Err(err) => {
            warn!(%err, "cannot read /proc/meminfo");
            None
        }
    }
}

fn meminfo_value(text: &str, key: &str) -> Option<f64> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            let rest = rest.trim_start_matches(':').trim();
            let number = rest.split_whitespace().next()?;
            return number.parse().ok();
        }
    }
    None
}

/// Parse the meminfo text into a used-percentage.
pub fn parse_meminfo(text: &str) -> Option<f32> {
    let total = meminfo_value(text, "MemTotal")?;
    if total <= 0.0 {
        return None;
    }

    let free = meminfo_value(text, "MemFree")?
        + meminfo_value(text, "Buffers").unwrap_or(0.0)
        + meminfo_value(text, "Cached").unwrap_or(0.0);

    Some(((total - free) / total * 100.0) as f32)
}
