use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use toondl::download::{DownloadOptions, Downloader, ExistingEpisodePolicy};
use toondl::errors::ScraperError;
use toondl::manifest::{DownloadStatus, Manifest};
use toondl::platform::{EpisodeId, Fetched, WebtoonInfo, WebtoonScraper};
use toondl::range::EpisodeRange;
use url::Url;

struct FakeScraper {
    info: WebtoonInfo,
    episode_urls: Vec<Option<Vec<Url>>>,
    url_fetches: Arc<AtomicUsize>,
}

impl FakeScraper {
    fn new(
        server: &mockito::ServerGuard,
        episode_titles: &[Option<&str>],
        images_per_episode: usize,
        url_fetches: &Arc<AtomicUsize>,
    ) -> anyhow::Result<Box<Self>> {
        let mut episode_urls = Vec::new();
        for (index, title) in episode_titles.iter().enumerate() {
            episode_urls.push(match title {
                None => None,
                Some(_) => Some(
                    (0..images_per_episode)
                        .map(|image| {
                            Url::parse(&format!("{}/e{index}/{image}.jpg", server.url()))
                        })
                        .collect::<Result<_, _>>()?,
                ),
            });
        }

        let info = WebtoonInfo {
            title: "Title".to_owned(),
            author: Some("Author".to_owned()),
            thumbnail_url: None,
            episode_ids: episode_titles
                .iter()
                .enumerate()
                .map(|(index, title)| {
                    title.map(|_| EpisodeId::Number(i64::try_from(index).unwrap() + 1))
                })
                .collect(),
            episode_titles: episode_titles
                .iter()
                .map(|title| title.map(str::to_owned))
                .collect(),
        };

        Ok(Box::new(Self {
            info,
            episode_urls,
            url_fetches: Arc::clone(url_fetches),
        }))
    }
}

#[async_trait]
impl WebtoonScraper for FakeScraper {
    fn platform(&self) -> &'static str {
        "fake"
    }

    fn webtoon_id(&self) -> String {
        "77".to_owned()
    }

    fn download_interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn fetch_webtoon_information(&mut self, _reload: bool) -> Result<Fetched, ScraperError> {
        Ok(Fetched::Complete)
    }

    async fn fetch_episode_information(&mut self, _reload: bool) -> Result<(), ScraperError> {
        Ok(())
    }

    fn information(&self) -> Result<&WebtoonInfo, ScraperError> {
        Ok(&self.info)
    }

    async fn get_episode_image_urls(
        &mut self,
        episode_no: usize,
    ) -> Result<Option<Vec<Url>>, ScraperError> {
        self.url_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.episode_urls.get(episode_no).cloned().flatten())
    }
}

fn listing(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = path
        .read_dir()?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<anyhow::Result<_>>()?;
    names.sort_unstable();
    Ok(names)
}

fn statuses(webtoon_directory: &Path) -> anyhow::Result<Vec<Option<DownloadStatus>>> {
    let manifest = Manifest::load(webtoon_directory)?;
    manifest
        .get("download_status")
        .ok_or_else(|| anyhow::anyhow!("manifest has no download_status"))
}

#[tokio::test]
async fn should_download_every_episode_into_named_directories() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 2, &fetches)?;

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };
    let webtoon_directory = downloader.download_webtoon(&options).await?;

    assert_eq!(temp.path().join("Title(77)"), webtoon_directory);
    assert_eq!(
        vec!["0001. One", "0002. Two", "information.json"],
        listing(&webtoon_directory)?
    );
    assert_eq!(
        vec!["000.jpg", "001.jpg"],
        listing(&webtoon_directory.join("0001. One"))?
    );
    assert_eq!(
        b"image bytes".to_vec(),
        std::fs::read(webtoon_directory.join("0001. One/000.jpg"))?
    );
    assert_eq!(
        vec![
            Some(DownloadStatus::Downloaded),
            Some(DownloadStatus::Downloaded),
        ],
        statuses(&webtoon_directory)?
    );

    Ok(())
}

#[tokio::test]
async fn second_run_should_skip_without_fetching_image_urls() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };

    let first_fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 1, &first_fetches)?;
    Downloader::new(scraper)?.download_webtoon(&options).await?;
    assert_eq!(2, first_fetches.load(Ordering::Relaxed));

    let second_fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 1, &second_fetches)?;
    let webtoon_directory = Downloader::new(scraper)?.download_webtoon(&options).await?;

    assert_eq!(
        0,
        second_fetches.load(Ordering::Relaxed),
        "skipped episodes never ask for image urls"
    );
    assert_eq!(
        vec![
            Some(DownloadStatus::AlreadyExist),
            Some(DownloadStatus::AlreadyExist),
        ],
        statuses(&webtoon_directory)?
    );

    Ok(())
}

#[tokio::test]
async fn failing_image_should_remove_the_episode_and_keep_the_manifest() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e0/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e1/0\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e1/1\.jpg$".to_owned()))
        .with_status(404)
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 2, &fetches)?;

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };
    let result = downloader.download_webtoon(&options).await;
    assert!(result.is_err(), "a failing image fails the whole run");

    let webtoon_directory = temp.path().join("Title(77)");
    assert_eq!(
        vec!["0001. One", "information.json"],
        listing(&webtoon_directory)?,
        "the half-downloaded episode was removed"
    );
    assert_eq!(
        vec![Some(DownloadStatus::Downloaded), None],
        statuses(&webtoon_directory)?,
        "the manifest still records the partial run"
    );

    Ok(())
}

#[tokio::test]
async fn range_skip_list_and_gaps_should_map_to_statuses() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), None, Some("Three")], 1, &fetches)?;

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        range: Some(EpisodeRange::from_string("1~2", true)?),
        skip_episodes: BTreeSet::from([3]),
        ..DownloadOptions::default()
    };
    let webtoon_directory = downloader.download_webtoon(&options).await?;

    assert_eq!(
        vec![
            Some(DownloadStatus::Downloaded),
            Some(DownloadStatus::NotDownloadable),
            Some(DownloadStatus::SkippedBySkipDownload),
        ],
        statuses(&webtoon_directory)?
    );

    Ok(())
}

#[tokio::test]
async fn missing_image_urls_should_fail_the_episode_but_not_the_run() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 1, &fetches)?;
    // The platform lists the episode but hands back no urls for it.
    scraper.episode_urls[0] = None;

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };
    let webtoon_directory = downloader.download_webtoon(&options).await?;

    assert_eq!(
        vec![
            Some(DownloadStatus::Failed),
            Some(DownloadStatus::Downloaded),
        ],
        statuses(&webtoon_directory)?
    );
    assert_eq!(
        vec!["0002. Two", "information.json"],
        listing(&webtoon_directory)?
    );

    Ok(())
}

#[tokio::test]
async fn snapshot_recorded_episodes_should_be_skipped_without_fetching() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let sidecar = serde_json::json!({
        "contents": {
            "0001. One": { "contents": { "000.jpg": "exists" } },
            "0002. Two": { "contents": { "000.jpg": "exists" } }
        }
    });
    std::fs::write(
        temp.path().join("Title(77).snapshots"),
        sidecar.to_string(),
    )?;

    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 1, &fetches)?;

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };
    let webtoon_directory = downloader.download_webtoon(&options).await?;

    assert_eq!(
        0,
        fetches.load(Ordering::Relaxed),
        "recorded episodes never ask for image urls"
    );
    assert_eq!(
        vec![
            Some(DownloadStatus::SkippedBySnapshot),
            Some(DownloadStatus::SkippedBySnapshot),
        ],
        statuses(&webtoon_directory)?
    );
    assert_eq!(
        vec!["information.json"],
        listing(&webtoon_directory)?,
        "no episode directories were materialized"
    );

    Ok(())
}

#[tokio::test]
async fn hard_check_should_keep_intact_episodes_and_redownload_corrupt_ones() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };

    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 2, &fetches)?;
    let webtoon_directory = Downloader::new(scraper)?.download_webtoon(&options).await?;

    // Episode 1 loses an image, episode 2 stays complete with altered bytes.
    std::fs::remove_file(webtoon_directory.join("0001. One/001.jpg"))?;
    std::fs::write(webtoon_directory.join("0002. Two/000.jpg"), b"kept bytes")?;

    let scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 2, &fetches)?;
    let webtoon_directory = Downloader::new(scraper)?
        .download_webtoon(&DownloadOptions {
            existing_episode: ExistingEpisodePolicy::HardCheck,
            ..options
        })
        .await?;

    assert_eq!(
        vec![
            Some(DownloadStatus::Downloaded),
            Some(DownloadStatus::AlreadyExist),
        ],
        statuses(&webtoon_directory)?
    );
    assert_eq!(
        vec!["000.jpg", "001.jpg"],
        listing(&webtoon_directory.join("0001. One"))?,
        "the incomplete episode was wiped and downloaded again"
    );
    assert_eq!(
        b"kept bytes".to_vec(),
        std::fs::read(webtoon_directory.join("0002. Two/000.jpg"))?,
        "the complete episode was left untouched"
    );

    Ok(())
}

#[tokio::test]
async fn download_again_should_replace_existing_episodes() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };

    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One")], 1, &fetches)?;
    let webtoon_directory = Downloader::new(scraper)?.download_webtoon(&options).await?;

    std::fs::write(webtoon_directory.join("0001. One/000.jpg"), b"stale bytes")?;

    let scraper = FakeScraper::new(&server, &[Some("One")], 1, &fetches)?;
    let webtoon_directory = Downloader::new(scraper)?
        .download_webtoon(&DownloadOptions {
            existing_episode: ExistingEpisodePolicy::DownloadAgain,
            ..options
        })
        .await?;

    assert_eq!(
        vec![Some(DownloadStatus::Downloaded)],
        statuses(&webtoon_directory)?
    );
    assert_eq!(
        b"image bytes".to_vec(),
        std::fs::read(webtoon_directory.join("0001. One/000.jpg"))?,
        "the stale episode was downloaded again"
    );

    Ok(())
}

#[tokio::test]
async fn mismatched_metadata_arrays_should_error_instead_of_panicking() -> anyhow::Result<()> {
    let server = mockito::Server::new_async().await;

    let temp = tempfile::tempdir()?;
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut scraper = FakeScraper::new(&server, &[Some("One"), Some("Two")], 1, &fetches)?;
    scraper.info.episode_ids.pop();

    let mut downloader = Downloader::new(scraper)?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };
    let result = downloader.download_webtoon(&options).await;

    assert!(
        result.is_err(),
        "uneven id/title arrays are a scraper contract violation"
    );

    Ok(())
}

#[tokio::test]
async fn raise_policy_should_refuse_existing_episodes() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/e\d+/\d+\.jpg$".to_owned()))
        .with_body(b"image bytes")
        .create_async()
        .await;

    let temp = tempfile::tempdir()?;
    let options = DownloadOptions {
        directory: temp.path().to_path_buf(),
        ..DownloadOptions::default()
    };

    let fetches = Arc::new(AtomicUsize::new(0));
    let scraper = FakeScraper::new(&server, &[Some("One")], 1, &fetches)?;
    Downloader::new(scraper)?.download_webtoon(&options).await?;

    let scraper = FakeScraper::new(&server, &[Some("One")], 1, &fetches)?;
    let result = Downloader::new(scraper)?
        .download_webtoon(&DownloadOptions {
            existing_episode: ExistingEpisodePolicy::Raise,
            ..options
        })
        .await;

    assert!(result.is_err(), "raise turns existing episodes into conflicts");

    Ok(())
}
