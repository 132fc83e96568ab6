//! Scraper for `comic.naver.com`.

use super::{EpisodeId, Fetched, Platform, WebtoonInfo, WebtoonScraper};
use crate::errors::ScraperError;
use crate::manifest::Manifest;
use crate::stdx::http::send_with_retry;
use anyhow::Context as _;
use async_trait::async_trait;
use log::warn;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

const PLATFORM: &str = "naver_webtoon";

/// The registry entry for Naver Webtoon.
pub(super) fn platform() -> Platform {
    Platform {
        code: PLATFORM,
        from_id,
        from_url,
    }
}

fn from_id(id: &str) -> Result<Box<dyn WebtoonScraper>, ScraperError> {
    let webtoon_id = id
        .parse::<u32>()
        .map_err(|_| ScraperError::InvalidWebtoonId {
            id: id.to_owned(),
            platform: PLATFORM,
        })?;

    Ok(Box::new(Naver::new(webtoon_id, WebtoonType::Webtoon)?))
}

fn from_url(url: &Url) -> Result<Option<Box<dyn WebtoonScraper>>, ScraperError> {
    if !matches!(
        url.host_str(),
        Some("comic.naver.com" | "m.comic.naver.com")
    ) {
        return Ok(None);
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(Iterator::collect)
        .unwrap_or_default();

    let webtoon_type = match segments.as_slice() {
        ["webtoon", "list"] => WebtoonType::Webtoon,
        ["bestChallenge", "list"] => WebtoonType::BestChallenge,
        ["challenge", "list"] => WebtoonType::Challenge,
        _ => return Ok(None),
    };

    let Some((_, title_id)) = url.query_pairs().find(|(key, _)| key == "titleId") else {
        return Ok(None);
    };

    let webtoon_id = title_id
        .parse::<u32>()
        .map_err(|_| ScraperError::InvalidUrl("`titleId` is not a number"))?;

    Ok(Some(Box::new(Naver::new(webtoon_id, webtoon_type)?)))
}

/// Which of Naver's three webtoon tiers the title belongs to. The tiers use
/// different viewer layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebtoonType {
    Webtoon,
    BestChallenge,
    Challenge,
}

impl WebtoonType {
    fn from_level_code(code: &str) -> Self {
        match code {
            "BEST_CHALLENGE" => Self::BestChallenge,
            "CHALLENGE" => Self::Challenge,
            _ => Self::Webtoon,
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            Self::Webtoon => "https://comic.naver.com/webtoon",
            Self::BestChallenge => "https://comic.naver.com/bestChallenge",
            Self::Challenge => "https://comic.naver.com/challenge",
        }
    }

    fn image_selector(self) -> &'static str {
        match self {
            Self::Webtoon => "#sectionContWide > img",
            Self::BestChallenge | Self::Challenge => "#comic_view_area > div > img",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Info {
    title_name: String,
    shared_thumbnail_url: Option<String>,
    #[serde(default)]
    community_artists: Vec<Artist>,
    webtoon_level_code: String,
    age: Age,
}

#[derive(Deserialize)]
struct Artist {
    name: String,
}

#[derive(Deserialize)]
struct Age {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleList {
    article_list: Vec<Article>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct Article {
    no: u32,
    subtitle: String,
}

/// Scraper for one Naver webtoon.
pub struct Naver {
    client: reqwest::Client,
    webtoon_id: u32,
    webtoon_type: WebtoonType,
    cookie: Option<String>,
    xsrf_token: Option<String>,
    info: Option<WebtoonInfo>,
    webtoon_fetched: bool,
    episodes_fetched: bool,
    raw_webtoon_info: Option<Value>,
    raw_articles: Option<Value>,
    authors: Vec<String>,
}

impl Naver {
    fn new(webtoon_id: u32, webtoon_type: WebtoonType) -> Result<Self, ScraperError> {
        Ok(Self {
            client: super::http_client()?,
            webtoon_id,
            webtoon_type,
            cookie: None,
            xsrf_token: None,
            info: None,
            webtoon_fetched: false,
            episodes_fetched: false,
            raw_webtoon_info: None,
            raw_articles: None,
            authors: Vec::new(),
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header("Referer", "https://comic.naver.com/webtoon/");

        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie);
        }
        if let Some(token) = &self.xsrf_token {
            request = request.header("X-Xsrf-Token", token);
        }

        request
    }

    fn info_mut(&mut self) -> &mut WebtoonInfo {
        self.info.get_or_insert_with(WebtoonInfo::default)
    }

    fn webtoon_type_code(&self) -> &'static str {
        match self.webtoon_type {
            WebtoonType::Webtoon => "WEBTOON",
            WebtoonType::BestChallenge => "BEST_CHALLENGE",
            WebtoonType::Challenge => "CHALLENGE",
        }
    }
}

#[async_trait]
impl WebtoonScraper for Naver {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn webtoon_id(&self) -> String {
        self.webtoon_id.to_string()
    }

    async fn fetch_webtoon_information(&mut self, reload: bool) -> Result<Fetched, ScraperError> {
        if self.webtoon_fetched && !reload {
            return Ok(Fetched::Complete);
        }

        let url = format!(
            "https://comic.naver.com/api/article/list/info?titleId={id}",
            id = self.webtoon_id
        );
        let response = send_with_retry(
            self.request(&url)
                .header("Accept", "application/json, text/plain, */*"),
        )
        .await?
        .error_for_status()
        .map_err(|_| ScraperError::InvalidWebtoonId {
            id: self.webtoon_id.to_string(),
            platform: PLATFORM,
        })?;

        let raw: Value = response
            .json()
            .await
            .map_err(|_| ScraperError::InvalidWebtoonId {
                id: self.webtoon_id.to_string(),
                platform: PLATFORM,
            })?;
        let parsed: Info = serde_json::from_value(raw.clone())
            .context("webtoon info payload changed shape")?;

        if self.cookie.is_none() && parsed.age.kind == "RATE_18" {
            return Err(ScraperError::Authentication(format!(
                "downloading the adult webtoon `{title}` requires a valid cookie",
                title = parsed.title_name
            )));
        }

        self.webtoon_type = WebtoonType::from_level_code(&parsed.webtoon_level_code);
        self.authors = parsed
            .community_artists
            .iter()
            .map(|artist| artist.name.clone())
            .collect();

        let thumbnail_url = parsed
            .shared_thumbnail_url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok());
        let author = (!self.authors.is_empty()).then(|| self.authors.join("/"));

        let info = self.info_mut();
        info.title = parsed.title_name;
        info.author = author;
        info.thumbnail_url = thumbnail_url;

        self.raw_webtoon_info = Some(raw);
        self.webtoon_fetched = true;

        Ok(Fetched::Complete)
    }

    async fn fetch_episode_information(&mut self, reload: bool) -> Result<(), ScraperError> {
        if self.episodes_fetched && !reload {
            return Ok(());
        }

        let mut articles: Vec<Article> = Vec::new();
        let mut previous: Vec<Article> = Vec::new();

        // The endpoint repeats its last page forever instead of 404ing.
        for page in 1.. {
            let url = format!(
                "https://comic.naver.com/api/article/list?titleId={id}&page={page}&sort=ASC",
                id = self.webtoon_id
            );
            let response = send_with_retry(self.request(&url)).await?.error_for_status()?;

            let list: ArticleList = response
                .json()
                .await
                .map_err(|_| ScraperError::InvalidWebtoonId {
                    id: self.webtoon_id.to_string(),
                    platform: PLATFORM,
                })?;

            if list.article_list == previous {
                break;
            }

            previous = list.article_list.clone();
            articles.extend(list.article_list);
        }

        let last = articles.iter().map(|article| article.no).max().unwrap_or(0);

        let mut episode_ids: Vec<Option<EpisodeId>> = Vec::new();
        let mut episode_titles: Vec<Option<String>> = Vec::new();

        // Positions missing from the listing (deleted or blinded episodes)
        // stay as gaps so later indices do not shift.
        for no in 1..=last {
            match articles.iter().find(|article| article.no == no) {
                Some(article) => {
                    episode_ids.push(Some(EpisodeId::Number(i64::from(article.no))));
                    episode_titles.push(Some(article.subtitle.clone()));
                }
                None => {
                    episode_ids.push(None);
                    episode_titles.push(None);
                }
            }
        }

        self.raw_articles = Some(serde_json::to_value(
            articles
                .iter()
                .map(|article| {
                    serde_json::json!({"no": article.no, "subtitle": article.subtitle})
                })
                .collect::<Vec<Value>>(),
        )
        .context("articles are always serializable")?);

        let info = self.info_mut();
        info.episode_ids = episode_ids;
        info.episode_titles = episode_titles;
        self.episodes_fetched = true;

        Ok(())
    }

    fn information(&self) -> Result<&WebtoonInfo, ScraperError> {
        self.info.as_ref().ok_or(ScraperError::NotFetched)
    }

    async fn get_episode_image_urls(
        &mut self,
        episode_no: usize,
    ) -> Result<Option<Vec<Url>>, ScraperError> {
        let Some(Some(EpisodeId::Number(article_no))) =
            self.information()?.episode_ids.get(episode_no).cloned()
        else {
            return Ok(None);
        };

        let url = format!(
            "{base}/detail?titleId={id}&no={article_no}",
            base = self.webtoon_type.base_url(),
            id = self.webtoon_id
        );

        let response = send_with_retry(self.request(&url)).await?;
        if response.error_for_status_ref().is_err() {
            return Ok(None);
        }
        let html = response.text().await?;

        let selector = Selector::parse(self.webtoon_type.image_selector())
            .map_err(|error| anyhow::anyhow!("invalid image selector: {error}"))?;

        let document = Html::parse_document(&html);
        let mut urls = Vec::new();
        for element in document.select(&selector) {
            let Some(src) = element.attr("src") else {
                continue;
            };

            // Rating banners and content guides are not panels.
            if src.contains("agerate") || src.contains("ctguide") {
                continue;
            }

            urls.push(Url::parse(src).context("panel image url is malformed")?);
        }

        Ok(Some(urls))
    }

    fn set_cookie(&mut self, cookie: &str) {
        static XSRF: &str = "XSRF-TOKEN=";

        self.xsrf_token = cookie.split(';').find_map(|part| {
            part.trim()
                .strip_prefix(XSRF)
                .map(|token| token.to_owned())
        });
        if self.xsrf_token.is_none() {
            warn!("cookie does not contain an XSRF-TOKEN entry, requests may be rejected");
        }

        self.cookie = Some(cookie.to_owned());
    }

    fn manifest_extras(&self, manifest: &mut Manifest) -> anyhow::Result<()> {
        manifest.set("webtoon_type", self.webtoon_type_code())?;
        manifest.set("authors", &self.authors)?;
        manifest.set(
            "extra",
            serde_json::json!({
                "raw_webtoon_info": self.raw_webtoon_info,
                "raw_articles": self.raw_articles,
            }),
        )?;
        Ok(())
    }
}
