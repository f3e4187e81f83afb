use anyhow::Result;
use regex::{Captures, Regex};
use tracing::trace;

/// Quality value used when no quality pattern matches
pub const UNKNOWN_QUALITY: &str = "Unknown";

/// Tokens derived from an original filename, consumed by the template renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameContext {
    /// Episode number as written in the filename, if one was found
    pub episode: Option<String>,
    /// Season number, or the configured default when absent
    pub season: String,
    /// Normalized quality label, or [`UNKNOWN_QUALITY`]
    pub quality: String,
}

/// A single filename pattern: a regex plus the function that turns its captures into a value
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    pub name: &'static str,
    pub regex: Regex,
    /// Function to pull the value out of a match
    pub pick: fn(&Captures) -> Option<String>,
}

impl FilenamePattern {
    pub fn new(
        name: &'static str,
        pattern: &str,
        pick: fn(&Captures) -> Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            pick,
        })
    }

    /// Apply this pattern to a filename
    pub fn apply(&self, filename: &str) -> Option<String> {
        self.regex.captures(filename).and_then(|caps| (self.pick)(&caps))
    }
}

fn group(caps: &Captures, index: usize) -> Option<String> {
    caps.get(index).map(|m| m.as_str().to_string())
}

/// Evaluate an ordered pattern list; the first pattern that yields a value wins
pub fn first_match<'a>(
    patterns: &'a [FilenamePattern],
    filename: &str,
) -> Option<(&'a str, String)> {
    patterns.iter().find_map(|pattern| {
        pattern.apply(filename).map(|value| {
            trace!("Pattern '{}' matched {:?} -> {}", pattern.name, filename, value);
            (pattern.name, value)
        })
    })
}

/// Episode patterns in priority order
pub fn episode_patterns() -> Result<Vec<FilenamePattern>> {
    Ok(vec![
        // Example: Show.S01E02.mkv, Show S01EP02.mkv
        FilenamePattern::new("season_episode", r"(?i)S(\d+)(?:EP|E)(\d+)", |c| group(c, 2))?,
        // Example: Show S01 E02.mkv, Show S01 - EP02.mkv
        FilenamePattern::new(
            "season_episode_spaced",
            r"(?i)S(\d+)\s*(?:-\s*)?(?:EP|E)\s*(\d+)",
            |c| group(c, 2),
        )?,
        // Example: Show [EP05].mkv, Show Episode 5.mkv
        FilenamePattern::new(
            "episode_marker",
            r"(?i)(?:^|[^a-z0-9])(?:episode|ep|e)\s*\.?\s*(\d+)",
            |c| group(c, 1),
        )?,
        // Example: Show - 05 [1080p].mkv
        FilenamePattern::new("dash_number", r"(?:^|\s)-\s*(\d+)", |c| group(c, 1))?,
        // Example: Show S2 09.mkv
        FilenamePattern::new("season_then_number", r"(?i)S(\d+)[^\d]*(\d+)", |c| group(c, 2))?,
        // Example: Show 12.mkv
        FilenamePattern::new(
            "standalone_number",
            r"(?:^|[^0-9A-Za-z])(\d+)(?:[^0-9A-Za-z]|$)",
            |c| group(c, 1),
        )?,
    ])
}

/// Season patterns in priority order
pub fn season_patterns() -> Result<Vec<FilenamePattern>> {
    Ok(vec![
        FilenamePattern::new("season_episode", r"(?i)S(\d+)(?:EP|E)\d+", |c| group(c, 1))?,
        FilenamePattern::new(
            "season_episode_spaced",
            r"(?i)S(\d+)\s*(?:-\s*)?(?:EP|E)\s*\d+",
            |c| group(c, 1),
        )?,
        // Example: Show Season 2 Episode 5.mkv
        FilenamePattern::new("season_word", r"(?i)\bseason\s*[._-]?\s*(\d+)", |c| group(c, 1))?,
        // Example: Show S2 09.mkv
        FilenamePattern::new(
            "season_marker",
            r"(?i)(?:^|[^0-9a-z])S(\d{1,2})(?:[^0-9a-z]|$)",
            |c| group(c, 1),
        )?,
    ])
}

/// Quality patterns in priority order. Combined tokens come before their
/// prefixes so that every entry can win for some filename.
pub fn quality_patterns() -> Result<Vec<FilenamePattern>> {
    Ok(vec![
        FilenamePattern::new("4k_x264", r"(?i)4k\s*x264", |_| Some("4K x264".to_string()))?,
        FilenamePattern::new("4k_x265", r"(?i)4k\s*x265", |_| Some("4K x265".to_string()))?,
        // Example: Show.1080p.mkv, Show [720P].mkv
        FilenamePattern::new("resolution", r"(?i)(?:^|[^0-9])(\d{3,4})p", |c| {
            group(c, 1).map(|height| format!("{height}p"))
        })?,
        // Example: Show 1920x1080.mkv
        FilenamePattern::new("dimensions", r"(?i)\b\d{3,4}\s*x\s*(\d{3,4})\b", |c| {
            group(c, 1).map(|height| format!("{height}p"))
        })?,
        FilenamePattern::new("4k", r"(?i)(?:^|[^0-9a-z])4k(?:[^0-9a-z]|$)", |_| {
            Some("4K".to_string())
        })?,
        FilenamePattern::new("2k", r"(?i)(?:^|[^0-9a-z])2k(?:[^0-9a-z]|$)", |_| {
            Some("2K".to_string())
        })?,
        FilenamePattern::new("hdrip", r"(?i)hd[\s._-]?rip", |_| Some("HDRip".to_string()))?,
    ])
}

/// Extracts episode, season and quality tokens from filenames
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    episode: Vec<FilenamePattern>,
    season: Vec<FilenamePattern>,
    quality: Vec<FilenamePattern>,
    season_default: String,
}

impl MetadataExtractor {
    /// Build an extractor with the built-in pattern lists
    pub fn new(season_default: impl Into<String>) -> Result<Self> {
        Ok(Self::from_patterns(
            episode_patterns()?,
            season_patterns()?,
            quality_patterns()?,
            season_default,
        ))
    }

    /// Build an extractor from explicit pattern lists
    pub fn from_patterns(
        episode: Vec<FilenamePattern>,
        season: Vec<FilenamePattern>,
        quality: Vec<FilenamePattern>,
        season_default: impl Into<String>,
    ) -> Self {
        Self {
            episode,
            season,
            quality,
            season_default: season_default.into(),
        }
    }

    pub fn extract(&self, filename: &str) -> RenameContext {
        RenameContext {
            episode: self.episode(filename),
            season: self.season(filename),
            quality: self.quality(filename),
        }
    }

    pub fn episode(&self, filename: &str) -> Option<String> {
        first_match(&self.episode, filename).map(|(_, value)| value)
    }

    pub fn season(&self, filename: &str) -> String {
        first_match(&self.season, filename)
            .map(|(_, value)| value)
            .unwrap_or_else(|| self.season_default.clone())
    }

    pub fn quality(&self, filename: &str) -> String {
        first_match(&self.quality, filename)
            .map(|(_, value)| value)
            .unwrap_or_else(|| UNKNOWN_QUALITY.to_string())
    }

    pub fn season_default(&self) -> &str {
        &self.season_default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extractor() -> MetadataExtractor {
        MetadataExtractor::new("01").unwrap()
    }

    /// Assert that `fixture` is claimed by `expected` and by no earlier pattern
    fn assert_exclusive(patterns: &[FilenamePattern], fixture: &str, expected: &str) {
        let position = patterns
            .iter()
            .position(|p| p.name == expected)
            .unwrap_or_else(|| panic!("no pattern named {expected}"));

        assert!(
            patterns[position].apply(fixture).is_some(),
            "{expected} should match {fixture:?}"
        );
        for earlier in &patterns[..position] {
            assert!(
                earlier.apply(fixture).is_none(),
                "{} shadows {} for {:?}",
                earlier.name,
                expected,
                fixture
            );
        }
    }

    #[test]
    fn test_episode_pattern_exclusivity() {
        let patterns = episode_patterns().unwrap();
        let fixtures = [
            ("Show.S01E02.mkv", "season_episode"),
            ("Show S01 E02.mkv", "season_episode_spaced"),
            ("Show S01 - EP02.mkv", "season_episode_spaced"),
            ("Show [EP05] [720p].mkv", "episode_marker"),
            ("Show Episode 5.mkv", "episode_marker"),
            ("Show - 05 [1080p].mkv", "dash_number"),
            ("Show S2 09.mkv", "season_then_number"),
            ("Show 12.mkv", "standalone_number"),
        ];
        for (fixture, name) in fixtures {
            assert_exclusive(&patterns, fixture, name);
        }
        assert_eq!(patterns.len(), 6, "every episode pattern needs a fixture");
    }

    #[test]
    fn test_season_pattern_exclusivity() {
        let patterns = season_patterns().unwrap();
        let fixtures = [
            ("Show.S03E02.mkv", "season_episode"),
            ("Show S03 E02.mkv", "season_episode_spaced"),
            ("Show Season 2 Episode 5.mkv", "season_word"),
            ("Show S2 09.mkv", "season_marker"),
        ];
        for (fixture, name) in fixtures {
            assert_exclusive(&patterns, fixture, name);
        }
    }

    #[test]
    fn test_quality_pattern_exclusivity() {
        let patterns = quality_patterns().unwrap();
        let fixtures = [
            ("Show 4kX264.mkv", "4k_x264"),
            ("Show 4kx265.mkv", "4k_x265"),
            ("Show.1080p.mkv", "resolution"),
            ("Show 1920x1080.mkv", "dimensions"),
            ("Show [4K].mkv", "4k"),
            ("Show (2k).mkv", "2k"),
            ("Show HdRip.mkv", "hdrip"),
        ];
        for (fixture, name) in fixtures {
            assert_exclusive(&patterns, fixture, name);
        }
    }

    #[test]
    fn test_extract_standard_release_name() {
        let ctx = extractor().extract("Show.S02E07.1080p.mkv");
        assert_eq!(ctx.episode.as_deref(), Some("07"));
        assert_eq!(ctx.season, "02");
        assert_eq!(ctx.quality, "1080p");
    }

    #[test]
    fn test_extract_defaults_when_nothing_matches() {
        let ctx = extractor().extract("randomfile.mkv");
        assert_eq!(ctx.episode, None);
        assert_eq!(ctx.season, "01");
        assert_eq!(ctx.quality, UNKNOWN_QUALITY);
    }

    #[test]
    fn test_season_default_is_configurable() {
        let extractor = MetadataExtractor::new("1").unwrap();
        assert_eq!(extractor.season("randomfile.mkv"), "1");
        assert_eq!(extractor.season_default(), "1");
    }

    #[test]
    fn test_quality_normalization() {
        let extractor = extractor();
        assert_eq!(extractor.quality("Show [720P].mkv"), "720p");
        assert_eq!(extractor.quality("Show 4K.mkv"), "4K");
        assert_eq!(extractor.quality("Show hdrip.avi"), "HDRip");
        assert_eq!(extractor.quality("Show 4KX265.mkv"), "4K x265");
        assert_eq!(extractor.quality("Show 4kX264.mkv"), "4K x264");
        assert_eq!(extractor.quality("Show.4k x264.mkv"), "4K x264");
        assert_eq!(extractor.quality("Show 1280x720.mp4"), "720p");
    }

    #[test]
    fn test_resolution_is_not_an_episode() {
        let extractor = extractor();
        assert_eq!(extractor.episode("Movie.720p.mkv"), None);
    }

    #[test]
    fn test_episode_keeps_leading_zeros() {
        assert_eq!(extractor().episode("Show - 007.mkv").as_deref(), Some("007"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_extract_never_panics(filename in ".{0,80}") {
            let ctx = extractor().extract(&filename);
            prop_assert!(!ctx.season.is_empty());
            prop_assert!(!ctx.quality.is_empty());
        }

        #[test]
        fn test_defaults_exactly_when_no_pattern_matches(filename in "[a-zA-Z ._-]{0,40}") {
            // Letters only: no digit-based pattern can match
            let extractor = extractor();
            let quality_hit = first_match(&quality_patterns().unwrap(), &filename).is_some();
            let ctx = extractor.extract(&filename);
            prop_assert_eq!(ctx.episode, None);
            prop_assert_eq!(ctx.season, "01".to_string());
            prop_assert_eq!(ctx.quality == UNKNOWN_QUALITY, !quality_hit);
        }

        #[test]
        fn test_reordering_only_changes_the_winner(
            filename in "[A-Za-z0-9 ._\\-\\[\\]]{0,40}",
            order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let patterns = episode_patterns().unwrap();
            let shuffled: Vec<FilenamePattern> =
                order.iter().map(|&i| patterns[i].clone()).collect();

            let original = first_match(&patterns, &filename);
            let reordered = first_match(&shuffled, &filename);

            // Either both lists find something or neither does
            prop_assert_eq!(original.is_some(), reordered.is_some());
            if let Some((name, value)) = reordered {
                let winner = patterns.iter().find(|p| p.name == name).unwrap();
                prop_assert_eq!(winner.apply(&filename), Some(value));
            }
        }
    }
}
