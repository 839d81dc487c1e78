//! Snapshot sources and the ingestion boundary.
//!
//! A snapshot is read from a JSON file, a directory of JSON files, or an
//! HTTP(S) endpoint, and decoded once into typed per-entity series.

pub mod decode;

pub use decode::{decode_document, LoadedEntity};

use crate::error::SnapshotError;
use crate::models::{DataQualityEvent, Entity, SizeTier};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where a snapshot is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotSource {
    /// A single JSON document.
    File(PathBuf),
    /// Every `.json` file below a directory, merged in path order.
    Directory(PathBuf),
    /// A JSON document served over HTTP(S).
    Http(String),
}

impl SnapshotSource {
    /// Pick `File` or `Directory` depending on what the path points to.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            SnapshotSource::Directory(path)
        } else {
            SnapshotSource::File(path)
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::File(path) => write!(f, "file:{}", path.display()),
            SnapshotSource::Directory(path) => write!(f, "dir:{}", path.display()),
            SnapshotSource::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Restriction of the monitored population.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Segment {
    pub tier: Option<SizeTier>,
    pub state: Option<String>,
}

impl Segment {
    pub fn is_all(&self) -> bool {
        self.tier.is_none() && self.state.is_none()
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        let tier_ok = self.tier.map_or(true, |tier| entity.tier == tier);
        let state_ok = self
            .state
            .as_ref()
            .map_or(true, |state| entity.state.eq_ignore_ascii_case(state));
        tier_ok && state_ok
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(tier) = self.tier {
            parts.push(format!("tier={}", tier));
        }
        if let Some(ref state) = self.state {
            parts.push(format!("state={}", state.to_uppercase()));
        }
        if parts.is_empty() {
            write!(f, "all")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

/// A fully decoded snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generated_at: Option<DateTime<Utc>>,
    pub entities: Vec<LoadedEntity>,
    pub data_quality: Vec<DataQualityEvent>,
}

impl Snapshot {
    /// Decode a single JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, SnapshotError> {
        let document = decode_document(content)?;
        let mut snapshot = Snapshot {
            generated_at: document.generated_at,
            ..Default::default()
        };
        snapshot.data_quality = document.data_quality;
        snapshot.absorb(document.entities);
        Ok(snapshot)
    }

    /// Append entities, keeping the first occurrence of each id.
    fn absorb(&mut self, entities: Vec<LoadedEntity>) {
        let mut seen: HashSet<String> = self.entities.iter().map(|e| e.entity.id.clone()).collect();

        for loaded in entities {
            if seen.insert(loaded.entity.id.clone()) {
                self.entities.push(loaded);
            } else {
                self.data_quality.push(DataQualityEvent::new(
                    loaded.entity.id,
                    "duplicate entity id; first occurrence kept",
                ));
            }
        }
    }

    /// Merge another snapshot into this one (first id wins).
    pub fn merge(&mut self, other: Snapshot) {
        self.generated_at = match (self.generated_at, other.generated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.data_quality.extend(other.data_quality);
        self.absorb(other.entities);
    }

    /// Keep only entities inside `segment`.
    pub fn filter_segment(mut self, segment: &Segment) -> Self {
        if !segment.is_all() {
            self.entities.retain(|loaded| segment.matches(&loaded.entity));
        }
        self
    }
}

/// Reads snapshots from any [`SnapshotSource`].
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    http_client: reqwest::Client,
}

impl SnapshotLoader {
    /// Create a loader whose HTTP requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SnapshotError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Load and decode a snapshot.
    pub async fn load(&self, source: &SnapshotSource) -> Result<Snapshot, SnapshotError> {
        let snapshot = match source {
            SnapshotSource::File(path) => load_file(path)?,
            SnapshotSource::Directory(path) => load_directory(path)?,
            SnapshotSource::Http(url) => self.load_http(url).await?,
        };

        info!(
            "Loaded {} entities from {} ({} data-quality events)",
            snapshot.entities.len(),
            source,
            snapshot.data_quality.len()
        );
        Ok(snapshot)
    }

    async fn load_http(&self, url: &str) -> Result<Snapshot, SnapshotError> {
        debug!("Fetching snapshot from {}", url);
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(SnapshotError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await?;
        Snapshot::from_json_str(&body)
    }
}

fn read_file(path: &Path) -> Result<String, SnapshotError> {
    std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn load_file(path: &Path) -> Result<Snapshot, SnapshotError> {
    Snapshot::from_json_str(&read_file(path)?)
}

/// Merge every JSON document below `root`.
///
/// An unreadable or malformed file is a data-quality event keyed by its
/// path; the rest of the directory still loads.
fn load_directory(root: &Path) -> Result<Snapshot, SnapshotError> {
    if !root.is_dir() {
        return Err(SnapshotError::Io {
            path: root.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut snapshot = Snapshot::default();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
    {
        let path = entry.path();
        match load_file(path) {
            Ok(part) => {
                debug!("Decoded {} ({} entities)", path.display(), part.entities.len());
                snapshot.merge(part);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                snapshot
                    .data_quality
                    .push(DataQualityEvent::new(path.display().to_string(), e.to_string()));
            }
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = include_str!("../../fixtures/sample_snapshot.json");

    fn part(ids: &[&str]) -> String {
        let entities: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{ "id": "{}", "tier": "small", "daily": {{ "2025": {{ "09-01": 1 }} }} }}"#,
                    id
                )
            })
            .collect();
        format!(r#"{{ "entities": [{}] }}"#, entities.join(","))
    }

    #[test]
    fn test_sample_fixture_decodes() {
        let snapshot = Snapshot::from_json_str(SAMPLE).unwrap();
        assert!(snapshot.generated_at.is_some());
        assert!(snapshot.entities.len() >= 4);
        assert!(snapshot
            .entities
            .iter()
            .any(|e| e.entity.tier == SizeTier::MediumLarge));
    }

    #[test]
    fn test_directory_merge_first_id_wins() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.json"), part(&["lab-1", "lab-2"])).unwrap();
        fs::write(dir.path().join("nested").join("b.json"), part(&["lab-2", "lab-3"])).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let snapshot = load_directory(dir.path()).unwrap();
        let ids: Vec<&str> = snapshot.entities.iter().map(|e| e.entity.id.as_str()).collect();
        assert_eq!(ids, vec!["lab-1", "lab-2", "lab-3"]);

        assert_eq!(snapshot.data_quality.len(), 2);
        assert!(snapshot.data_quality.iter().any(|e| e.entity_id.ends_with("broken.json")));
        assert!(snapshot.data_quality.iter().any(|e| e.entity_id == "lab-2"));
    }

    #[test]
    fn test_source_from_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("snapshot.json");
        fs::write(&file, part(&["x"])).unwrap();

        assert_eq!(
            SnapshotSource::from_path(dir.path()),
            SnapshotSource::Directory(dir.path().to_path_buf())
        );
        assert_eq!(SnapshotSource::from_path(&file), SnapshotSource::File(file.clone()));
    }

    #[test]
    fn test_load_file_through_loader() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("snapshot.json");
        fs::write(&file, part(&["x", "y"])).unwrap();

        let loader = SnapshotLoader::new(Duration::from_secs(5)).unwrap();
        let snapshot = tokio_test::block_on(loader.load(&SnapshotSource::File(file))).unwrap();
        assert_eq!(snapshot.entities.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = SnapshotLoader::new(Duration::from_secs(5)).unwrap();
        let result = tokio_test::block_on(
            loader.load(&SnapshotSource::File(PathBuf::from("/nonexistent/snapshot.json"))),
        );
        assert!(matches!(result, Err(SnapshotError::Io { .. })));
    }

    #[test]
    fn test_segment_filter() {
        let snapshot = Snapshot::from_json_str(SAMPLE).unwrap();
        let total = snapshot.entities.len();

        let segment = Segment {
            tier: Some(SizeTier::Large),
            state: None,
        };
        let filtered = snapshot.clone().filter_segment(&segment);
        assert!(filtered.entities.len() < total);
        assert!(filtered.entities.iter().all(|e| e.entity.tier == SizeTier::Large));

        let by_state = Segment {
            tier: None,
            state: Some("sp".to_string()),
        };
        assert!(snapshot
            .filter_segment(&by_state)
            .entities
            .iter()
            .all(|e| e.entity.state == "SP"));
        assert_eq!(by_state.to_string(), "state=SP");
        assert_eq!(Segment::default().to_string(), "all");
    }
}
