use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 漫畫記錄的唯一識別碼，由持久層配發
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComicId(pub u64);

impl fmt::Display for ComicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ComicId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    Cbz,
    Cbr,
    Cb7,
}

impl ArchiveType {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename).extension()?.to_str()?;
        match extension.to_ascii_lowercase().as_str() {
            "cbz" | "zip" => Some(ArchiveType::Cbz),
            "cbr" | "rar" => Some(ArchiveType::Cbr),
            "cb7" | "7z" => Some(ArchiveType::Cb7),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::Cbz => "cbz",
            ArchiveType::Cbr => "cbr",
            ArchiveType::Cb7 => "cb7",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComicMetadata {
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub volume: Option<String>,
    pub issue_number: Option<String>,
    pub title: Option<String>,
    pub cover_date: Option<NaiveDate>,
    pub description: Option<String>,
}

impl ComicMetadata {
    /// 以 `other` 中有值的欄位覆蓋目前的欄位
    pub fn merge_from(&mut self, other: ComicMetadata) {
        fn take(slot: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.publisher, other.publisher);
        take(&mut self.series, other.series);
        take(&mut self.volume, other.volume);
        take(&mut self.issue_number, other.issue_number);
        take(&mut self.title, other.title);
        take(&mut self.description, other.description);
        if other.cover_date.is_some() {
            self.cover_date = other.cover_date;
        }
    }
}

/// Batch markers set by the library UI and consumed by the batch steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Organizing,
    Purging,
    BatchScraping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComicBook {
    pub id: ComicId,
    pub filename: String,
    #[serde(default)]
    pub metadata: ComicMetadata,
    #[serde(default)]
    pub organizing: bool,
    #[serde(default)]
    pub purging: bool,
    #[serde(default)]
    pub batch_scraping: bool,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ComicBook {
    pub fn new(id: impl Into<ComicId>, filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            metadata: ComicMetadata::default(),
            organizing: false,
            purging: false,
            batch_scraping: false,
            last_modified: None,
        }
    }

    pub fn archive_type(&self) -> Option<ArchiveType> {
        ArchiveType::from_filename(&self.filename)
    }

    pub fn is_marked(&self, marker: Marker) -> bool {
        match marker {
            Marker::Organizing => self.organizing,
            Marker::Purging => self.purging,
            Marker::BatchScraping => self.batch_scraping,
        }
    }

    pub fn set_marker(&mut self, marker: Marker, value: bool) {
        match marker {
            Marker::Organizing => self.organizing = value,
            Marker::Purging => self.purging = value,
            Marker::BatchScraping => self.batch_scraping = value,
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepSummary {
    pub step: String,
    pub read: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl StepSummary {
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComicEvent {
    Updated { id: ComicId },
    Removed { id: ComicId },
    StepFinished { summary: StepSummary },
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_type_from_filename() {
        assert_eq!(
            ArchiveType::from_filename("Batman 001.CBZ"),
            Some(ArchiveType::Cbz)
        );
        assert_eq!(ArchiveType::from_filename("x/y.cbr"), Some(ArchiveType::Cbr));
        assert_eq!(ArchiveType::from_filename("notes.txt"), None);
        assert_eq!(ArchiveType::from_filename("no-extension"), None);
    }

    #[test]
    fn test_merge_only_overwrites_present_fields() {
        let mut metadata = ComicMetadata {
            publisher: Some("DC".to_string()),
            series: Some("Batman".to_string()),
            ..Default::default()
        };

        metadata.merge_from(ComicMetadata {
            series: Some("Detective Comics".to_string()),
            issue_number: Some("27".to_string()),
            ..Default::default()
        });

        assert_eq!(metadata.publisher.as_deref(), Some("DC"));
        assert_eq!(metadata.series.as_deref(), Some("Detective Comics"));
        assert_eq!(metadata.issue_number.as_deref(), Some("27"));
    }

    #[test]
    fn test_comic_deserializes_with_defaults() {
        let comic: ComicBook =
            serde_json::from_str(r#"{"id": 5, "filename": "/lib/a.cbz", "purging": true}"#)
                .unwrap();
        assert_eq!(comic.id, ComicId(5));
        assert!(comic.is_marked(Marker::Purging));
        assert!(!comic.is_marked(Marker::Organizing));
        assert_eq!(comic.metadata, ComicMetadata::default());
    }
}
