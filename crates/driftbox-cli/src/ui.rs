//! UI utilities for Driftbox CLI.

use driftbox_core::client::TaskProgress;

/// Format a byte count as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Parse a size like "4M", "512K", "1G" or a plain byte count.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 1024),
        Some((i, 'm' | 'M')) => (&s[..i], 1024 * 1024),
        Some((i, 'g' | 'G')) => (&s[..i], 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{s}'"))?;
    if value == 0 {
        return Err("size must be greater than zero".to_string());
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

/// One-line progress summary, e.g. `[ 67%] 2/3 chunks - 12.3 MB/s`.
pub fn progress_line(progress: &TaskProgress) -> String {
    format!(
        "[{:>3}%] {}/{} chunks - {}",
        progress.percentage, progress.completed_chunks, progress.total_chunks, progress.speed
    )
}
