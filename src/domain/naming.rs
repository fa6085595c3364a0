//! Rename rules used when organizing comics into the library.
//!
//! A rule is a path template such as `$PUBLISHER/$SERIES v$VOLUME/$SERIES #$ISSUE`.
//! `/` in the rule separates directories; slashes inside a token's value are
//! sanitized so a series name can never create extra directories.

use crate::domain::model::ComicBook;
use regex::{Captures, Regex};
use std::sync::LazyLock;

const UNKNOWN: &str = "Unknown";
const TOKENS: [&str; 7] = [
    "PUBLISHER", "SERIES", "VOLUME", "ISSUE", "TITLE", "COVERDATE", "PUBYEAR",
];

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(PUBLISHER|SERIES|VOLUME|ISSUE|TITLE|COVERDATE|PUBYEAR)")
        .expect("token pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRule {
    template: String,
    issue_padding: usize,
}

impl RenameRule {
    pub fn new(template: impl Into<String>, issue_padding: usize) -> Self {
        Self {
            template: template.into(),
            issue_padding,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.template.trim().is_empty()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Upper-case `$WORD`s that are not rename tokens.
    pub fn unknown_tokens(&self) -> Vec<String> {
        self.template
            .split('$')
            .skip(1)
            .filter_map(|rest| {
                let word: String = rest.chars().take_while(|c| c.is_ascii_uppercase()).collect();
                (!word.is_empty() && !TOKENS.contains(&word.as_str())).then_some(word)
            })
            .collect()
    }

    /// Renders the rule for `comic`, without extension. Returns `None` for an
    /// empty rule, meaning the original filename is kept.
    pub fn render(&self, comic: &ComicBook) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let metadata = &comic.metadata;
        let rendered = TOKEN.replace_all(self.template.trim(), |caps: &Captures| {
            let value = match &caps[1] {
                "PUBLISHER" => text_or_unknown(&metadata.publisher),
                "SERIES" => text_or_unknown(&metadata.series),
                "VOLUME" => text_or_unknown(&metadata.volume),
                "TITLE" => text_or_unknown(&metadata.title),
                "ISSUE" => pad_issue(
                    metadata.issue_number.as_deref().unwrap_or("0"),
                    self.issue_padding,
                ),
                "COVERDATE" => metadata
                    .cover_date
                    .map(|date| date.format("%Y-%m").to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                "PUBYEAR" => metadata
                    .cover_date
                    .map(|date| date.format("%Y").to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                _ => String::new(),
            };
            sanitize(&value)
        });

        let path = rendered
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Some(path)
    }
}

fn text_or_unknown(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// Zero-pads a numeric issue number's integer part; other values are kept.
fn pad_issue(issue: &str, width: usize) -> String {
    let issue = issue.trim();
    let (whole, fraction) = match issue.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (issue, None),
    };

    let numeric = !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.is_none_or(|f| f.chars().all(|c| c.is_ascii_digit()));
    if !numeric {
        return issue.to_string();
    }

    match fraction {
        Some(fraction) => format!("{:0>width$}.{}", whole, fraction, width = width),
        None => format!("{:0>width$}", whole, width = width),
    }
}

/// Replaces characters that are not allowed in file names.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
