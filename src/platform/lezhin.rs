//! Scraper for `www.lezhin.com`.
//!
//! Lezhin embeds all webtoon and episode metadata in the comic page's
//! framework payload, serves episode images through signed CDN URLs, and
//! shuffles the images of some titles into 5x5 tile grids. Unshuffling runs
//! as a post-processing pass over the finished directory.

use super::{EpisodeId, Fetched, Options, Platform, WebtoonInfo, WebtoonScraper};
use crate::errors::ScraperError;
use crate::manifest::Manifest;
use crate::stdx::http::{DEFAULT_USER_AGENT, send_with_retry};
use crate::unshuffle::unshuffle_webtoon;
use anyhow::Context as _;
use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const PLATFORM: &str = "lezhin_comics";

/// Cookie sent when the caller supplies none; sets the locale only.
const DEFAULT_COOKIE: &str = "x-lz-locale=ko_KR";

/// The registry entry for Lezhin Comics.
pub(super) fn platform() -> Platform {
    Platform {
        code: PLATFORM,
        from_id,
        from_url,
    }
}

fn from_id(id: &str) -> Result<Box<dyn WebtoonScraper>, ScraperError> {
    Ok(Box::new(Lezhin::new(id)?))
}

fn from_url(url: &Url) -> Result<Option<Box<dyn WebtoonScraper>>, ScraperError> {
    if url.host_str() != Some("www.lezhin.com") {
        return Ok(None);
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(Iterator::collect)
        .unwrap_or_default();

    match segments.as_slice() {
        [_locale, "comic", webtoon_id] => Ok(Some(Box::new(Lezhin::new(webtoon_id)?))),
        _ => Ok(None),
    }
}

static NEXT_PAYLOAD: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"self\.__next_.\.push\(\[\d,(.*)\]\)$").unwrap()
});

#[derive(Deserialize)]
struct Entity {
    meta: Meta,
}

#[derive(Deserialize)]
struct Meta {
    content: Content,
    #[serde(default)]
    episodes: Vec<Episode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    id: i64,
    #[serde(default)]
    is_adult: bool,
    display: Display,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    artists: Vec<Artist>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    image_shuffle: bool,
}

#[derive(Deserialize)]
struct Display {
    title: String,
}

#[derive(Deserialize)]
struct Artist {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Episode {
    id: i64,
    name: String,
    display: Display,
    properties: Properties,
    freed_at: Option<i64>,
    published_at: Option<i64>,
    updated_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    not_for_sale: bool,
}

#[derive(Deserialize)]
struct KeygenResponse {
    data: SignedKeys,
}

#[derive(Deserialize)]
struct SignedKeys {
    #[serde(rename = "Policy")]
    policy: String,
    #[serde(rename = "Signature")]
    signature: String,
    #[serde(rename = "Key-Pair-Id")]
    key_pair_id: String,
}

/// Scraper for one Lezhin comic.
pub struct Lezhin {
    client: reqwest::Client,
    webtoon_id: String,
    cookie: String,
    bearer: Option<String>,
    info: Option<WebtoonInfo>,
    fetched: bool,
    webtoon_int_id: i64,
    is_adult: bool,
    is_shuffled: bool,
    episode_int_ids: Vec<i64>,
    availability: Vec<bool>,
    unusable_episodes: Vec<bool>,
    free_episodes: Vec<bool>,
    free_dates: Vec<Option<i64>>,
    published_dates: Vec<Option<i64>>,
    updated_dates: Vec<Option<i64>>,
    // Options.
    unshuffle: bool,
    delete_shuffled: bool,
    download_paid_episode: bool,
    thread_number: Option<usize>,
}

impl Lezhin {
    fn new(webtoon_id: &str) -> Result<Self, ScraperError> {
        // Lezhin is a slow platform; give requests plenty of time.
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .use_rustls_tls()
            .https_only(true)
            .brotli(true)
            .timeout(Duration::from_secs(50))
            .build()?;

        Ok(Self {
            client,
            webtoon_id: webtoon_id.to_owned(),
            cookie: std::env::var("LEZHIN_COOKIE").unwrap_or_else(|_| DEFAULT_COOKIE.to_owned()),
            bearer: std::env::var("LEZHIN_BEARER").ok(),
            info: None,
            fetched: false,
            webtoon_int_id: 0,
            is_adult: false,
            is_shuffled: false,
            episode_int_ids: Vec::new(),
            availability: Vec::new(),
            unusable_episodes: Vec::new(),
            free_episodes: Vec::new(),
            free_dates: Vec::new(),
            published_dates: Vec::new(),
            updated_dates: Vec::new(),
            unshuffle: true,
            delete_shuffled: false,
            download_paid_episode: true,
            thread_number: None,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header("Referer", "https://www.lezhin.com/ko/comic/dr_hearthstone/1")
            .header("X-Lz-Adult", "0")
            .header("X-Lz-Allowadult", "false")
            .header("X-Lz-Country", "kr")
            .header("X-Lz-Locale", "ko-KR")
            .header("Cookie", &self.cookie);

        if let Some(bearer) = &self.bearer {
            request = request.header("Authorization", bearer);
        }

        request
    }

    fn set_bearer(&mut self, bearer: &str) -> Result<(), ScraperError> {
        if !bearer.starts_with("Bearer") || bearer == "Bearer ..." {
            return Err(ScraperError::Authentication(
                "invalid bearer, it must start with `Bearer `".to_owned(),
            ));
        }

        self.bearer = Some(bearer.to_owned());
        Ok(())
    }

    /// Pulls the metadata entity out of the comic page's framework payload.
    fn parse_entity(html: &str) -> anyhow::Result<Entity> {
        let document = Html::parse_document(html);

        let selector = Selector::parse("script")
            .map_err(|error| anyhow::anyhow!("invalid script selector: {error}"))?;
        let script = document
            .select(&selector)
            .filter_map(|element| {
                let text: String = element.text().collect();
                NEXT_PAYLOAD
                    .captures(text.trim())
                    .map(|captures| captures[1].to_owned())
            })
            .last()
            .context("no framework payload found in comic page")?;

        // The capture is a JSON string literal whose content is `N:` followed
        // by the actual JSON array.
        let literal: String =
            serde_json::from_str(&script).context("payload is not a string literal")?;
        let body = literal.get(2..).context("payload is shorter than its tag")?;
        let value: Value = serde_json::from_str(body).context("payload body is not JSON")?;

        let entity = value
            .get(1)
            .and_then(|value| value.get(3))
            .and_then(|value| value.get("entity"))
            .context("payload carries no entity")?;

        Ok(serde_json::from_value(entity.clone())?)
    }

    fn adult_gate_error(&self) -> ScraperError {
        if self.cookie == DEFAULT_COOKIE {
            ScraperError::Authentication(
                "adult webtoon is not available without a cookie".to_owned(),
            )
        } else {
            ScraperError::Authentication(
                "the account is not adult-authenticated, cannot download adult webtoons"
                    .to_owned(),
            )
        }
    }
}

#[async_trait]
impl WebtoonScraper for Lezhin {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn webtoon_id(&self) -> String {
        self.webtoon_id.clone()
    }

    async fn fetch_webtoon_information(&mut self, _reload: bool) -> Result<Fetched, ScraperError> {
        // Everything lives in the comic page payload.
        Ok(Fetched::DelegatedToEpisodes)
    }

    async fn fetch_episode_information(&mut self, reload: bool) -> Result<(), ScraperError> {
        if self.fetched && !reload {
            return Ok(());
        }

        let url = format!(
            "https://www.lezhin.com/ko/comic/{id}",
            id = self.webtoon_id
        );
        let response = send_with_retry(self.request(&url))
            .await?
            .error_for_status()
            .map_err(|_| ScraperError::InvalidWebtoonId {
                id: self.webtoon_id.clone(),
                platform: PLATFORM,
            })?;
        let html = response.text().await?;

        {
            let document = Html::parse_document(&html);
            let h2 = Selector::parse("h2")
                .map_err(|error| anyhow::anyhow!("invalid title selector: {error}"))?;
            if document.select(&h2).next().is_none() {
                return Err(self.adult_gate_error());
            }
        }

        let entity =
            Self::parse_entity(&html).map_err(|_| ScraperError::InvalidWebtoonId {
                id: self.webtoon_id.clone(),
                platform: PLATFORM,
            })?;

        let thumbnail_url = {
            let document = Html::parse_document(&html);
            let og_image = Selector::parse(r#"meta[property="og:image"]"#)
                .map_err(|error| anyhow::anyhow!("invalid thumbnail selector: {error}"))?;
            document
                .select(&og_image)
                .next()
                .and_then(|element| element.attr("content"))
                .and_then(|raw| Url::parse(raw).ok())
        };

        self.webtoon_int_id = entity.meta.content.id;
        self.is_adult = entity.meta.content.is_adult;
        self.is_shuffled = entity.meta.content.metadata.image_shuffle;

        let authors: Vec<String> = entity
            .meta
            .content
            .artists
            .iter()
            .map(|artist| artist.name.clone())
            .collect();

        let mut episode_ids = Vec::new();
        let mut episode_titles = Vec::new();
        self.episode_int_ids.clear();
        self.availability.clear();
        self.unusable_episodes.clear();
        self.free_episodes.clear();
        self.free_dates.clear();
        self.published_dates.clear();
        self.updated_dates.clear();

        // The payload lists newest first; positions are oldest first.
        for episode in entity.meta.episodes.iter().rev() {
            let unusable = episode.properties.expired || episode.properties.not_for_sale;
            let free = episode.freed_at.is_some();
            let downloadable = !unusable && (self.download_paid_episode || free);

            episode_ids.push(Some(EpisodeId::Text(episode.name.clone())));
            episode_titles.push(Some(episode.display.title.clone()));
            self.episode_int_ids.push(episode.id);
            self.availability.push(downloadable);
            self.unusable_episodes.push(unusable);
            self.free_episodes.push(free);
            self.free_dates.push(episode.freed_at);
            self.published_dates.push(episode.published_at);
            self.updated_dates.push(episode.updated_at);
        }

        let info = self.info.get_or_insert_with(WebtoonInfo::default);
        info.title = entity.meta.content.display.title;
        info.author = (!authors.is_empty()).then(|| authors.join(", "));
        info.thumbnail_url = thumbnail_url;
        info.episode_ids = episode_ids;
        info.episode_titles = episode_titles;

        self.fetched = true;
        Ok(())
    }

    fn information(&self) -> Result<&WebtoonInfo, ScraperError> {
        self.info.as_ref().ok_or(ScraperError::NotFetched)
    }

    async fn get_episode_image_urls(
        &mut self,
        episode_no: usize,
    ) -> Result<Option<Vec<Url>>, ScraperError> {
        if !self.availability.get(episode_no).copied().unwrap_or(false) {
            return Ok(None);
        }

        let Some(Some(EpisodeId::Text(episode_name))) =
            self.information()?.episode_ids.get(episode_no).cloned()
        else {
            return Ok(None);
        };
        let episode_int_id = *self
            .episode_int_ids
            .get(episode_no)
            .context("episode ids and positions are parallel")?;

        let keygen_url = format!(
            "https://www.lezhin.com/lz-api/v2/cloudfront/signed-url/generate?\
             contentId={content_id}&episodeId={episode_int_id}&purchased=false&q=30&firstCheckType=P",
            content_id = self.webtoon_int_id
        );

        let keys_response = send_with_retry(self.request(&keygen_url)).await?;
        if keys_response.status() == 403 {
            if self.bearer.is_some() {
                warn!(
                    "cannot retrieve episode {episode_name}, it is probably paid or unavailable"
                );
            } else {
                warn!("cannot retrieve episode {episode_name}, set a bearer to download properly");
            }
            return Ok(None);
        }

        let keys: KeygenResponse = keys_response.error_for_status()?.json().await?;

        let inventory_url = format!(
            "https://www.lezhin.com/lz-api/v2/inventory_groups/comic_viewer_k?\
             platform=web&store=web&alias={alias}&name={name}&preload=false&type=comic_episode",
            alias = self.webtoon_id,
            name = urlencoding::encode(&episode_name),
        );

        let inventory: Value = send_with_retry(self.request(&inventory_url))
            .await?
            .error_for_status()?
            .json()
            .await?;

        let scrolls = inventory
            .pointer("/data/extra/episode/scrollsInfo")
            .and_then(Value::as_array)
            .context("viewer inventory carries no scroll info")?;

        let mut urls = Vec::with_capacity(scrolls.len());
        for scroll in scrolls {
            let path = scroll
                .get("path")
                .and_then(Value::as_str)
                .context("scroll entry has no image path")?;

            let url = format!(
                "https://rcdn.lezhin.com/v2{path}.webp?purchased=false&q=30&updated=1587628135437\
                 &Policy={policy}&Signature={signature}&Key-Pair-Id={key_pair_id}",
                policy = keys.data.policy,
                signature = keys.data.signature,
                key_pair_id = keys.data.key_pair_id,
            );
            urls.push(Url::parse(&url).context("assembled image url is malformed")?);
        }

        Ok(Some(urls))
    }

    fn set_cookie(&mut self, cookie: &str) {
        self.cookie = cookie.to_owned();
    }

    fn apply_options(&mut self, options: &Options) -> Result<(), ScraperError> {
        fn boolean(raw: &str) -> Result<bool, ScraperError> {
            match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => other
                    .parse::<i64>()
                    .map(|value| value != 0)
                    .map_err(|_| {
                        ScraperError::Unexpected(anyhow::anyhow!(
                            "invalid boolean option value: `{other}`"
                        ))
                    }),
            }
        }

        for (option, value) in options {
            let key = option.trim().to_ascii_uppercase().replace('-', "_");
            match key.as_str() {
                "UNSHUFFLE" => self.unshuffle = boolean(value)?,
                "DELETE_SHUFFLED" => self.delete_shuffled = boolean(value)?,
                "DOWNLOAD_PAID" => self.download_paid_episode = boolean(value)?,
                "BEARER" => self.set_bearer(value)?,
                "THREAD_NUMBER" => {
                    if value.eq_ignore_ascii_case("default") {
                        self.thread_number = None;
                    } else {
                        self.thread_number = Some(value.parse().map_err(|_| {
                            ScraperError::Unexpected(anyhow::anyhow!(
                                "invalid thread number: `{value}`"
                            ))
                        })?);
                    }
                }
                _ => warn!("unknown option for {PLATFORM}: `{option}` (value: `{value}`)"),
            }
        }

        Ok(())
    }

    fn directory_name_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.is_shuffled {
            tags.push("shuffled");
        }
        tags
    }

    fn manifest_extras(&self, manifest: &mut Manifest) -> anyhow::Result<()> {
        manifest.set("is_shuffled", self.is_shuffled)?;
        manifest.set("webtoon_int_id", self.webtoon_int_id)?;
        manifest.set("episode_int_ids", &self.episode_int_ids)?;
        manifest.set("is_adult", self.is_adult)?;
        manifest.set(
            "extra",
            serde_json::json!({
                "availability": self.availability,
                "unusable_episodes": self.unusable_episodes,
                "free_episodes": self.free_episodes,
                "free_dates": self.free_dates,
                "published_dates": self.published_dates,
                "updated_dates": self.updated_dates,
            }),
        )?;
        manifest.set(
            "credentials",
            serde_json::json!({ "bearer": self.bearer }),
        )?;
        Ok(())
    }

    fn post_process(&self, webtoon_directory: &Path) -> Result<PathBuf, ScraperError> {
        if !self.is_shuffled || !self.unshuffle {
            if self.is_shuffled {
                warn!("this webtoon is shuffled but unshuffling is disabled, images stay scrambled");
            }
            return Ok(webtoon_directory.to_path_buf());
        }

        let name = webtoon_directory
            .file_name()
            .and_then(|name| name.to_str())
            .context("webtoon directory has no name")
            .map_err(ScraperError::Unexpected)?;

        let target_name = if let Some(stripped) = name.strip_suffix(", shuffled)") {
            format!("{stripped})")
        } else if let Some(stripped) = name.strip_suffix(", shuffled, HD)") {
            format!("{stripped}, HD)")
        } else {
            return Err(ScraperError::Unexpected(anyhow::anyhow!(
                "directory `{name}` does not carry a shuffled tag"
            )));
        };
        let target = webtoon_directory.with_file_name(target_name);

        unshuffle_webtoon(
            webtoon_directory,
            &target,
            Some(&self.episode_int_ids),
            self.thread_number,
        )
        .map_err(|error| ScraperError::Unexpected(anyhow::Error::from(error)))?;

        if self.delete_shuffled {
            std::fs::remove_dir_all(webtoon_directory)
                .map_err(|error| ScraperError::Unexpected(anyhow::Error::from(error)))?;
            info!("shuffled webtoon directory was deleted");
        }

        Ok(target)
    }
}
