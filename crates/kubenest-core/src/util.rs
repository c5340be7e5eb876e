//! Shared text helpers used across kubenest components.

use std::time::Duration;

/// Strip carriage returns so progress-style subprocess output renders as
/// discrete lines instead of overwriting itself.
pub fn sanitize_log_line(line: &str) -> String {
    let cleaned = line.replace('\r', "");
    cleaned.trim_end().to_string()
}

/// Truncate to a display width, appending an ellipsis when content was cut.
/// Counts chars, not terminal columns; wide glyphs may still misalign.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let len = text.chars().count();
    if len <= width {
        return text.to_string();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut out = String::new();
    for ch in text.chars().take(width - 3) {
        out.push(ch);
    }
    out.push_str("...");
    out
}

/// Format a duration as a compact `1m23s` / `45s` label for phase rows.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes == 0 {
        format!("{seconds}s")
    } else {
        format!("{minutes}m{seconds:02}s")
    }
}

/// Format remaining time as a `mm:ss` countdown for the header.
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_carriage_returns_and_trailing_space() {
        assert_eq!(sanitize_log_line("pulling layer\r"), "pulling layer");
        assert_eq!(sanitize_log_line("done  \r\n"), "done");
    }

    #[test]
    fn truncate_keeps_short_text_and_cuts_long_text() {
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("a longer message", 9), "a long...");
        assert_eq!(truncate_to_width("abc", 0), "");
        assert_eq!(truncate_to_width("abcdef", 2), "ab");
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(Duration::from_secs(9)), "9s");
        assert_eq!(format_duration(Duration::from_secs(83)), "1m23s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m00s");
        assert_eq!(format_countdown(Duration::from_secs(95)), "01:35");
    }
}
