//! Common helpers shared across models

use num_format::{Locale, ToFormattedString};

/// Sentinel reported in place of a byte total when the platform cannot tell
/// how much space a filesystem uses.
pub const USAGE_UNAVAILABLE: i64 = -1;

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Group digits of an entry count for display ("12,345").
pub fn format_count(count: u64) -> String {
    count.to_formatted_string(&Locale::en)
}
