//! The `information.json` manifest written next to downloaded episodes.
//!
//! The manifest records what a run knew (title, author, episode ids and
//! titles) and what it did (per-episode [`DownloadStatus`]). Re-running a
//! download merges into the previous manifest instead of clobbering it, so
//! diagnostics from earlier runs survive.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;

/// File name of the manifest inside a webtoon directory.
pub const INFORMATION_FILE: &str = "information.json";

/// Outcome of one episode within a download run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Freshly downloaded this run.
    Downloaded,
    /// No image URLs were available, or the download failed permanently.
    Failed,
    /// A directory (or file) for the episode already existed on disk.
    AlreadyExist,
    /// The snapshot sidecar recorded the episode as existing.
    SkippedBySnapshot,
    /// The platform lists the position but nothing can be downloaded there.
    NotDownloadable,
    /// Excluded by the episode range expression.
    SkippedByRange,
    /// Excluded by the caller-supplied skip list.
    SkippedBySkipDownload,
}

/// The manifest under construction for one webtoon directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    fields: Map<String, Value>,
}

impl Manifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `information.json` from `webtoon_directory`.
    ///
    /// A missing manifest yields an empty one; a malformed one is an error.
    pub fn load(webtoon_directory: &Path) -> anyhow::Result<Self> {
        let path = webtoon_directory.join(INFORMATION_FILE);

        if !path.exists() {
            return Ok(Self::new());
        }

        let raw = std::fs::read_to_string(&path)?;
        let fields = serde_json::from_str(&raw)?;
        Ok(Self { fields })
    }

    /// Sets a top-level field, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> anyhow::Result<()> {
        self.fields.insert(key.to_owned(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Reads back a field, deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.fields.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, key: &str) {
        self.fields.remove(key);
    }

    /// Whether the manifest has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merges the previous run's manifest underneath this one.
    ///
    /// Fields only the old manifest has are kept. Where both have a field and
    /// both values are JSON objects, the objects merge per key with this
    /// manifest's entries winning. Anything else keeps this manifest's value.
    pub fn merge_from(&mut self, old: &Self) {
        for (key, old_value) in &old.fields {
            match self.fields.get_mut(key) {
                None => {
                    self.fields.insert(key.clone(), old_value.clone());
                }
                Some(Value::Object(new_object)) => {
                    if let Value::Object(old_object) = old_value {
                        for (old_key, old_entry) in old_object {
                            new_object
                                .entry(old_key.clone())
                                .or_insert_with(|| old_entry.clone());
                        }
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Writes `information.json` into `webtoon_directory`.
    ///
    /// Top-level fields named in `excluded` (platform subcategories like
    /// `credentials`) are left out of the persisted file.
    pub fn write(&self, webtoon_directory: &Path, excluded: &[&str]) -> anyhow::Result<()> {
        let mut fields = self.fields.clone();
        for category in excluded {
            fields.remove(*category);
        }

        let path = webtoon_directory.join(INFORMATION_FILE);
        let raw = serde_json::to_string_pretty(&Value::Object(fields))?;
        std::fs::write(&path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn statuses_should_serialize_snake_case() -> anyhow::Result<()> {
        assert_eq!(
            json!(["downloaded", "skipped_by_range", "not_downloadable", null]),
            serde_json::to_value([
                Some(DownloadStatus::Downloaded),
                Some(DownloadStatus::SkippedByRange),
                Some(DownloadStatus::NotDownloadable),
                None,
            ])?
        );

        Ok(())
    }

    #[test]
    fn merge_should_keep_old_only_fields() -> anyhow::Result<()> {
        let mut new = Manifest::new();
        new.set("title", "Title")?;

        let mut old = Manifest::new();
        old.set("merge_number", 5)?;
        old.set("title", "Old Title")?;

        new.merge_from(&old);

        assert_eq!(Some(5), new.get::<u32>("merge_number"));
        assert_eq!(Some("Title".to_owned()), new.get::<String>("title"));

        Ok(())
    }

    #[test]
    fn merge_should_combine_objects_per_key() -> anyhow::Result<()> {
        let mut new = Manifest::new();
        new.set("extra", json!({"comments": 3}))?;

        let mut old = Manifest::new();
        old.set("extra", json!({"comments": 1, "authors_note": "hi"}))?;

        new.merge_from(&old);

        assert_eq!(
            Some(json!({"comments": 3, "authors_note": "hi"})),
            new.get::<Value>("extra")
        );

        Ok(())
    }

    #[test]
    fn write_should_drop_excluded_subcategories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;

        let mut manifest = Manifest::new();
        manifest.set("title", "Title")?;
        manifest.set("credentials", json!({"bearer": "secret"}))?;
        manifest.write(temp.path(), &["credentials"])?;

        let written = Manifest::load(temp.path())?;
        assert_eq!(Some("Title".to_owned()), written.get::<String>("title"));
        assert_eq!(None, written.get::<Value>("credentials"));

        Ok(())
    }

    #[test]
    fn load_should_default_to_empty_when_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;

        let manifest = Manifest::load(temp.path())?;
        assert!(manifest.is_empty(), "no manifest file on disk");

        Ok(())
    }
}
