//! Platform collaborators: one scraper implementation per supported site.
//!
//! The download orchestrator only ever talks to the [`WebtoonScraper`] trait;
//! everything site-specific (endpoints, payload shapes, auth quirks) lives in
//! the platform modules. Platforms are registered explicitly through
//! [`Platforms::builtin`], there is no global registry.

pub mod lezhin;
pub mod naver;

use crate::errors::ScraperError;
use crate::manifest::Manifest;
use crate::stdx::http::DEFAULT_USER_AGENT;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Identifier of an episode as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpisodeId {
    /// Numeric id.
    Number(i64),
    /// Opaque textual id.
    Text(String),
}

/// Metadata of one webtoon, populated by the fetch calls.
///
/// `episode_ids` and `episode_titles` are parallel arrays. A `None` entry
/// marks a position that exists on the platform but cannot be downloaded
/// (deleted or blinded); gaps never shift the indices of later episodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebtoonInfo {
    /// Webtoon title.
    pub title: String,
    /// Author or artists, comma-joined.
    pub author: Option<String>,
    /// Thumbnail image URL.
    pub thumbnail_url: Option<Url>,
    /// Per-position episode ids.
    pub episode_ids: Vec<Option<EpisodeId>>,
    /// Per-position episode titles.
    pub episode_titles: Vec<Option<String>>,
}

/// What a call to [`WebtoonScraper::fetch_webtoon_information`] accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// Webtoon-level metadata was fetched.
    Complete,
    /// Everything is fetched by `fetch_episode_information` on this platform.
    DelegatedToEpisodes,
}

/// Free-form `key=value` options passed through from the CLI.
pub type Options = BTreeMap<String, String>;

/// One platform implementation, dyn-dispatched by the orchestrator.
#[async_trait]
pub trait WebtoonScraper: Send {
    /// Stable platform code, e.g. `naver_webtoon`.
    fn platform(&self) -> &'static str;

    /// The webtoon id as a display string.
    fn webtoon_id(&self) -> String;

    /// Courtesy delay applied once per episode before its first request.
    fn download_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Fetches webtoon-level metadata (title, author, thumbnail).
    ///
    /// Results are cached; `reload` bypasses and overwrites the cache.
    /// Authentication and rating errors surface here, before any directory
    /// is touched.
    async fn fetch_webtoon_information(&mut self, reload: bool) -> Result<Fetched, ScraperError>;

    /// Fetches the parallel episode id/title arrays. Cached like
    /// [`Self::fetch_webtoon_information`].
    async fn fetch_episode_information(&mut self, reload: bool) -> Result<(), ScraperError>;

    /// The fetched metadata, or [`ScraperError::NotFetched`] before any
    /// successful fetch.
    fn information(&self) -> Result<&WebtoonInfo, ScraperError>;

    /// Image URLs of the episode at 0-based position `episode_no`.
    ///
    /// `None` or an empty list means the episode is permanently
    /// undownloadable for this run.
    async fn get_episode_image_urls(
        &mut self,
        episode_no: usize,
    ) -> Result<Option<Vec<Url>>, ScraperError>;

    /// Supplies a cookie for authenticated content.
    fn set_cookie(&mut self, _cookie: &str) {}

    /// Applies free-form platform options. Unknown keys are logged, invalid
    /// values for known keys are errors.
    fn apply_options(&mut self, options: &Options) -> Result<(), ScraperError> {
        for (option, value) in options {
            warn!(
                "unknown option for {platform}: `{option}` (value: `{value}`)",
                platform = self.platform()
            );
        }

        Ok(())
    }

    /// Extra name tags appended to the webtoon directory name, e.g.
    /// `Title(id, shuffled)`.
    fn directory_name_tags(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Extension to assume when an image URL does not reveal one.
    fn default_file_extension(&self) -> Option<&'static str> {
        None
    }

    /// Adds platform-specific manifest fields (subcategories like `extra`).
    fn manifest_extras(&self, _manifest: &mut Manifest) -> anyhow::Result<()> {
        Ok(())
    }

    /// Post-processing hook after all episodes finished.
    ///
    /// May redirect subsequent manifest writes by returning a different
    /// directory than the one just populated.
    fn post_process(&self, webtoon_directory: &Path) -> Result<PathBuf, ScraperError> {
        Ok(webtoon_directory.to_path_buf())
    }
}

/// Runs both fetch phases in order.
pub async fn fetch_all(
    scraper: &mut dyn WebtoonScraper,
    reload: bool,
) -> Result<(), ScraperError> {
    scraper.fetch_webtoon_information(reload).await?;
    scraper.fetch_episode_information(reload).await
}

/// Constructors of one registered platform.
pub struct Platform {
    /// Stable platform code.
    pub code: &'static str,
    /// Builds a scraper from a webtoon id string.
    pub from_id: fn(&str) -> Result<Box<dyn WebtoonScraper>, ScraperError>,
    /// Builds a scraper from a URL, `None` when the URL is not recognized.
    pub from_url: fn(&Url) -> Result<Option<Box<dyn WebtoonScraper>>, ScraperError>,
}

/// Explicit registry of platform implementations.
pub struct Platforms {
    entries: Vec<Platform>,
}

impl Platforms {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The registry with all built-in platforms.
    pub fn builtin() -> Self {
        let mut platforms = Self::new();
        platforms.register(naver::platform());
        platforms.register(lezhin::platform());
        platforms
    }

    /// Adds a platform.
    pub fn register(&mut self, platform: Platform) {
        self.entries.push(platform);
    }

    /// Registered platform codes, in registration order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.entries.iter().map(|platform| platform.code).collect()
    }

    /// Builds a scraper for `code` and a webtoon id.
    pub fn instantiate(
        &self,
        code: &str,
        webtoon_id: &str,
    ) -> Result<Box<dyn WebtoonScraper>, ScraperError> {
        let platform = self
            .entries
            .iter()
            .find(|platform| platform.code == code)
            .ok_or_else(|| ScraperError::InvalidPlatform(code.to_owned()))?;

        (platform.from_id)(webtoon_id)
    }

    /// Probes every platform with `url`, returning the first that claims it.
    pub fn match_url(&self, url: &Url) -> Result<Option<Box<dyn WebtoonScraper>>, ScraperError> {
        for platform in &self.entries {
            if let Some(scraper) = (platform.from_url)(url)? {
                return Ok(Some(scraper));
            }
        }

        Ok(None)
    }
}

impl Default for Platforms {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The HTTP client shared by platform implementations.
pub(crate) fn http_client() -> Result<reqwest::Client, ScraperError> {
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .use_rustls_tls()
        .brotli(true)
        .build()?;

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_registry_should_know_both_platforms() {
        let platforms = Platforms::builtin();

        assert_eq!(vec!["naver_webtoon", "lezhin_comics"], platforms.codes());
    }

    #[test]
    fn unknown_platform_code_should_fail() {
        let platforms = Platforms::builtin();

        let result = platforms.instantiate("bufftoon", "123");

        assert!(
            matches!(result, Err(ScraperError::InvalidPlatform(_))),
            "expected an invalid-platform error, got an unexpected result"
        );
    }

    #[test]
    fn episode_ids_should_serialize_untagged() -> anyhow::Result<()> {
        let ids = vec![
            Some(EpisodeId::Number(10)),
            Some(EpisodeId::Text("abc".to_owned())),
            None,
        ];

        assert_eq!(
            serde_json::json!([10, "abc", null]),
            serde_json::to_value(&ids)?
        );

        Ok(())
    }
}
