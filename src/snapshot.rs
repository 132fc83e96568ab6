//! Snapshot sidecars: a JSON-recorded listing of expected directory contents.
//!
//! A `<webtoon-dir-name>.snapshots` file next to a webtoon directory stands in
//! for a real filesystem listing when the true state lives elsewhere (cloud
//! synced, not yet materialized). The downloader consults it as a union with
//! the real listing wherever it would otherwise only list the directory.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One entry of a snapshot tree.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Node {
    /// A file; the recorded value is the marker string `"exists"`.
    Leaf(String),
    /// A directory with its own recorded contents.
    Directory {
        /// Child entries by name.
        contents: BTreeMap<String, Node>,
    },
}

/// The recorded listing of one webtoon directory.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Top-level entries by name.
    #[serde(default)]
    contents: BTreeMap<String, Node>,
}

impl Snapshot {
    /// Loads the `<name>.snapshots` sibling of `webtoon_directory`, if any.
    ///
    /// A missing sidecar is not an error; an unreadable or malformed one is.
    pub fn load(webtoon_directory: &Path) -> anyhow::Result<Option<Self>> {
        let Some(name) = webtoon_directory.file_name() else {
            return Ok(None);
        };

        let mut sidecar = name.to_owned();
        sidecar.push(".snapshots");
        let path = webtoon_directory.with_file_name(sidecar);

        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&raw)?;
        Ok(Some(snapshot))
    }

    /// Whether the snapshot records a file at `name`.
    pub fn is_file(&self, name: &str) -> bool {
        matches!(self.contents.get(name), Some(Node::Leaf(_)))
    }

    /// Whether the snapshot records a directory at `name`.
    pub fn is_dir(&self, name: &str) -> bool {
        matches!(self.contents.get(name), Some(Node::Directory { .. }))
    }

    /// Names recorded inside the directory entry `name`, empty when `name` is
    /// not a recorded directory.
    pub fn children(&self, name: &str) -> Vec<&str> {
        match self.contents.get(name) {
            Some(Node::Directory { contents }) => contents.keys().map(String::as_str).collect(),
            Some(Node::Leaf(_)) | None => Vec::new(),
        }
    }
}
