//! Parsing of the transcoder's progress side channel.
//!
//! With `-progress pipe:2` ffmpeg writes `key=value` lines such as
//! `out_time=00:01:30.500000`; the classic stats line
//! `frame=.. time=00:01:30.50 bitrate=..` is understood as well.

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// # Examples
/// ```
/// use autorename::ffmpeg::progress::parse_time;
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
/// assert_eq!(parse_time("invalid"), None);
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let time_str = time_str.trim();
    // ffmpeg reports negative positions before the first frame
    if time_str.starts_with('-') {
        return None;
    }
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total.is_finite() && total >= 0.0).then_some(total)
}

/// Parse the `time=` field of a progress line (e.g. `time=00:01:30.50`).
///
/// Returns `None` when the line carries no time marker or the value is
/// `N/A`, which ffmpeg emits before the first frame is written.
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(char::is_whitespace).unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Whether a line belongs to the progress stream rather than diagnostics
pub fn is_progress_line(line: &str) -> bool {
    const KEYS: &[&str] = &[
        "frame=",
        "fps=",
        "stream_",
        "bitrate=",
        "total_size=",
        "out_time",
        "dup_frames=",
        "drop_frames=",
        "speed=",
        "progress=",
    ];
    let line = line.trim_start();
    KEYS.iter().any(|key| line.starts_with(key)) || line.contains(" time=")
}

/// Completion as a percentage of `duration`, clamped to `0..=100`
pub fn percentage(elapsed: f64, duration: f64) -> Option<f64> {
    (duration > 0.0).then(|| (elapsed / duration * 100.0).clamp(0.0, 100.0))
}
