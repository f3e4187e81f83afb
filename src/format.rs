use humansize::{format_size, BINARY};
use std::time::Duration;

use crate::ffmpeg::progress::percentage;

/// Longest error text shown to a user
pub const MAX_USER_MESSAGE: usize = 150;

const BAR_WIDTH: usize = 20;

/// Human readable byte count, e.g. `1.50 MiB`
pub fn human_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// `MM:SS`, or `HH:MM:SS` once an hour is reached
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Bar of filled and empty cells for a percentage in `0..=100`
pub fn progress_bar(percent: f64) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).floor() as usize;
    format!(
        "{}{}",
        "▰".repeat(filled),
        "▱".repeat(BAR_WIDTH - filled)
    )
}

/// Status text for a download or upload in flight
pub fn transfer_status(label: &str, current: u64, total: u64, elapsed: Duration) -> String {
    let percent = if total > 0 {
        current as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { current as f64 / secs } else { 0.0 };
    let eta = if speed > 0.0 {
        total.saturating_sub(current) as f64 / speed
    } else {
        0.0
    };

    format!(
        "{label}\n\n{}\n\n📊 Progress: {percent:.1}%\n📦 Size: {} / {}\n🚀 Speed: {}/s\n⏱️ Elapsed: {}\n⏳ ETA: {}",
        progress_bar(percent),
        human_size(current),
        human_size(total),
        human_size(speed as u64),
        format_duration(secs),
        format_duration(eta),
    )
}

/// Status text for a transcode in flight; without a duration only elapsed media time is shown
pub fn transcode_status(label: &str, elapsed_media: f64, duration: Option<f64>) -> String {
    let progress =
        duration.and_then(|total| percentage(elapsed_media, total).map(|percent| (total, percent)));
    match progress {
        Some((total, percent)) => {
            format!(
                "{label}\n\n{}\n\n📊 Progress: {percent:.1}%\n🎞️ Position: {} / {}",
                progress_bar(percent),
                format_duration(elapsed_media),
                format_duration(total),
            )
        }
        None => format!(
            "{label}\n\n🎞️ Position: {}",
            format_duration(elapsed_media)
        ),
    }
}

/// Cut a message to at most `max` characters, marking the cut with an ellipsis
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(59.9), "00:59");
        assert_eq!(format_duration(1420.0), "23:40");
        assert_eq!(format_duration(3725.0), "01:02:05");
        assert_eq!(format_duration(-3.0), "00:00");
        assert_eq!(format_duration(f64::NAN), "00:00");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0).chars().filter(|c| *c == '▰').count(), 0);
        assert_eq!(progress_bar(50.0).chars().filter(|c| *c == '▰').count(), 10);
        assert_eq!(progress_bar(250.0).chars().filter(|c| *c == '▰').count(), 20);
        assert_eq!(progress_bar(42.0).chars().count(), 20);
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 150), "short");
        let long = "é".repeat(200);
        let truncated = truncate_message(&long, 150);
        assert_eq!(truncated.chars().count(), 150);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_transcode_status() {
        let with_total = transcode_status("Processing", 30.0, Some(60.0));
        assert!(with_total.contains("50.0%"));
        assert!(with_total.contains("00:30 / 01:00"));

        let without_total = transcode_status("Processing", 75.0, None);
        assert!(without_total.contains("01:15"));
        assert!(!without_total.contains('%'));

        let zero_total = transcode_status("Processing", 10.0, Some(0.0));
        assert!(!zero_total.contains('%'));
    }

    #[test]
    fn test_transfer_status() {
        let status = transfer_status("Downloading", 512, 1024, Duration::from_secs(2));
        assert!(status.starts_with("Downloading"));
        assert!(status.contains("50.0%"));
        assert!(status.contains("ETA: 00:02"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert!(human_size(4 * 1024 * 1024 * 1024).starts_with('4'));
    }
}
