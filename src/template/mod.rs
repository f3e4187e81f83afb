use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::extract::RenameContext;

/// Placeholder used when the filename carries no episode number
pub const EPISODE_SENTINEL: &str = "XX";

static BRACE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid token regex"));
static BRACKET_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-z_]+)\]").expect("valid token regex"));

/// How placeholders are written in user templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSyntax {
    /// `{episode}`
    #[default]
    Brace,
    /// `[episode]`
    Bracket,
}

impl TokenSyntax {
    fn regex(self) -> &'static Regex {
        match self {
            TokenSyntax::Brace => &*BRACE_TOKEN,
            TokenSyntax::Bracket => &*BRACKET_TOKEN,
        }
    }

    /// Write `name` as a placeholder in this syntax
    pub fn token(self, name: &str) -> String {
        match self {
            TokenSyntax::Brace => format!("{{{name}}}"),
            TokenSyntax::Bracket => format!("[{name}]"),
        }
    }
}

impl FromStr for TokenSyntax {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brace" | "{}" => Ok(TokenSyntax::Brace),
            "bracket" | "[]" => Ok(TokenSyntax::Bracket),
            other => Err(format!("Unknown token syntax '{other}', expected brace or bracket")),
        }
    }
}

/// Substitute every recognized placeholder using `lookup`; unknown ones stay as written
pub fn substitute<F>(template: &str, syntax: TokenSyntax, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    syntax
        .regex()
        .replace_all(template, |caps: &Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Render a rename template with the tokens extracted from a filename
pub fn render(template: &str, syntax: TokenSyntax, ctx: &RenameContext) -> String {
    substitute(template, syntax, |name| match name {
        "episode" => Some(
            ctx.episode
                .clone()
                .unwrap_or_else(|| EPISODE_SENTINEL.to_string()),
        ),
        "season" => Some(ctx.season.clone()),
        "quality" => Some(ctx.quality.clone()),
        _ => None,
    })
}

/// Values available to caption templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionContext {
    pub filename: String,
    pub filesize: String,
    pub duration: String,
}

/// Render a caption template (`{filename}`, `{filesize}`, `{duration}`)
pub fn render_caption(template: &str, syntax: TokenSyntax, ctx: &CaptionContext) -> String {
    substitute(template, syntax, |name| match name {
        "filename" => Some(ctx.filename.clone()),
        "filesize" => Some(ctx.filesize.clone()),
        "duration" => Some(ctx.duration.clone()),
        _ => None,
    })
}

/// Caption used when the user has not configured one
pub fn default_caption(filename: &str) -> String {
    format!("**{filename}**")
}

/// Build the final file name from a rendered template and the original name's extension
pub fn target_file_name(rendered: &str, original: &str) -> String {
    let stem: String = rendered
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let stem = if stem.is_empty() || stem == "." || stem == ".." {
        "file".to_string()
    } else {
        stem
    };

    match std::path::Path::new(original)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem,
    }
}
