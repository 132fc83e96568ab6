//! The download orchestrator: one run downloads one webtoon.
//!
//! A run moves through fetching metadata, preparing the webtoon directory,
//! downloading episodes strictly in position order, platform post-processing,
//! and finalizing. The `information.json` manifest is written on success and
//! failure alike, so a crashed or canceled run still records what happened.

use crate::directory::{DirectoryState, Precision};
use crate::errors::{DownloadError, ScraperError};
use crate::manifest::{DownloadStatus, INFORMATION_FILE, Manifest};
use crate::platform::{WebtoonScraper, fetch_all};
use crate::range::EpisodeRange;
use crate::snapshot::Snapshot;
use crate::stdx;
use crate::stdx::http::send_with_retry;
use anyhow::Context as _;
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use url::Url;

/// What to do with an episode whose directory already has contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingEpisodePolicy {
    /// Leave it alone and record `already_exist`.
    #[default]
    Skip,
    /// Treat it as a fatal conflict.
    Raise,
    /// Wipe it and download again.
    DownloadAgain,
    /// Keep it only when its listing matches the expected image count and
    /// naming, wipe and download again otherwise.
    HardCheck,
}

/// Caller-facing knobs of one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Base directory the webtoon directory is created under.
    pub directory: PathBuf,
    /// Episode filter; `None` downloads everything.
    pub range: Option<EpisodeRange>,
    /// Policy for episodes that already exist on disk (or in the snapshot).
    pub existing_episode: ExistingEpisodePolicy,
    /// 1-based episode numbers to skip outright.
    pub skip_episodes: BTreeSet<u32>,
    /// Bypasses the scraper's metadata cache.
    pub reload: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("webtoon"),
            range: None,
            existing_episode: ExistingEpisodePolicy::default(),
            skip_episodes: BTreeSet::new(),
            reload: false,
        }
    }
}

/// Drives one scraper through a full download run.
pub struct Downloader {
    scraper: Box<dyn WebtoonScraper>,
    client: reqwest::Client,
    stop: Arc<AtomicBool>,
}

impl Downloader {
    /// Wraps a scraper together with the client used for image downloads.
    pub fn new(scraper: Box<dyn WebtoonScraper>) -> Result<Self, ScraperError> {
        Ok(Self {
            scraper,
            client: crate::platform::http_client()?,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The wrapped scraper, for configuration before the run.
    pub fn scraper_mut(&mut self) -> &mut dyn WebtoonScraper {
        self.scraper.as_mut()
    }

    /// The wrapped scraper.
    pub fn scraper(&self) -> &dyn WebtoonScraper {
        self.scraper.as_ref()
    }

    /// A flag that cancels the run when set; checked between episodes.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Shares an external cancellation flag instead of the internal one.
    #[must_use]
    pub fn with_stop_handle(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Requests cancellation at the next episode boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Downloads the whole webtoon, returning its final directory.
    ///
    /// The final directory differs from the one episodes were written into
    /// when the platform's post-processing redirected it (Lezhin unshuffle).
    pub async fn download_webtoon(
        &mut self,
        options: &DownloadOptions,
    ) -> Result<PathBuf, DownloadError> {
        fetch_all(self.scraper.as_mut(), options.reload).await?;

        let (title, thumbnail_url, episode_count) = {
            let information = self.scraper.information()?;
            (
                information.title.clone(),
                information.thumbnail_url.clone(),
                information.episode_ids.len(),
            )
        };

        let mut raw_name = format!("{title}({id}", id = self.scraper.webtoon_id());
        for tag in self.scraper.directory_name_tags() {
            raw_name.push_str(", ");
            raw_name.push_str(tag);
        }
        raw_name.push(')');
        let directory_name = stdx::fs::safe_name(&raw_name);

        let webtoon_directory = options.directory.join(&directory_name);
        std::fs::create_dir_all(&webtoon_directory)?;

        let snapshot = Snapshot::load(&webtoon_directory)?;
        let previous = Manifest::load(&webtoon_directory)?;

        let thumbnail_name = thumbnail_url.as_ref().map(|url| {
            let extension =
                stdx::fs::file_extension(url.as_str()).unwrap_or_else(|| "jpg".to_owned());
            stdx::fs::safe_name(&format!("{title}.{extension}"))
        });
        let thumbnail_task = self.start_thumbnail_download(
            &webtoon_directory,
            thumbnail_url,
            thumbnail_name.as_deref(),
            snapshot.as_ref(),
        );

        info!(
            "downloading `{title}` into `{directory}`",
            directory = webtoon_directory.display()
        );

        let mut statuses: Vec<Option<DownloadStatus>> = vec![None; episode_count];
        let mut run = self
            .download_episodes(options, &webtoon_directory, snapshot.as_ref(), &mut statuses)
            .await;

        let final_directory = if run.is_ok() {
            match self.scraper.post_process(&webtoon_directory) {
                Ok(directory) => directory,
                Err(error) => {
                    run = Err(error.into());
                    webtoon_directory.clone()
                }
            }
        } else {
            webtoon_directory.clone()
        };

        match thumbnail_task {
            Some(handle) if run.is_err() => handle.abort(),
            Some(handle) => match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!("thumbnail download failed: {error:#}"),
                Err(error) => warn!("thumbnail task failed: {error}"),
            },
            None => {}
        }

        self.finalize(
            &webtoon_directory,
            &final_directory,
            &directory_name,
            thumbnail_name,
            &statuses,
            &previous,
        )?;

        run?;
        Ok(final_directory)
    }

    fn start_thumbnail_download(
        &self,
        webtoon_directory: &Path,
        url: Option<Url>,
        name: Option<&str>,
        snapshot: Option<&Snapshot>,
    ) -> Option<JoinHandle<anyhow::Result<()>>> {
        let url = url?;
        let name = name?;

        let path = webtoon_directory.join(name);
        let recorded = snapshot.is_some_and(|snapshot| snapshot.is_file(name));
        if path.exists() || recorded {
            return None;
        }

        let client = self.client.clone();
        Some(tokio::spawn(async move {
            let response = send_with_retry(client.get(url)).await?.error_for_status()?;
            let bytes = response.bytes().await?;
            tokio::fs::write(&path, &bytes).await?;
            Ok(())
        }))
    }

    async fn download_episodes(
        &mut self,
        options: &DownloadOptions,
        webtoon_directory: &Path,
        snapshot: Option<&Snapshot>,
        statuses: &mut [Option<DownloadStatus>],
    ) -> Result<(), DownloadError> {
        let episode_titles = self.scraper.information()?.episode_titles.clone();

        // `episode_ids` (which sized `statuses`) and `episode_titles` are a
        // parallel-arrays contract on the scraper.
        if episode_titles.len() != statuses.len() {
            return Err(DownloadError::Unexpected(anyhow::anyhow!(
                "scraper reported {ids} episode ids but {titles} episode titles",
                ids = statuses.len(),
                titles = episode_titles.len(),
            )));
        }

        for (index, episode_title) in episode_titles.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                return Err(DownloadError::Canceled);
            }

            let episode_no = u32::try_from(index + 1).context("episode position overflow")?;

            if options.skip_episodes.contains(&episode_no) {
                statuses[index] = Some(DownloadStatus::SkippedBySkipDownload);
                continue;
            }

            if let Some(range) = &options.range {
                if !range.contains(episode_no) {
                    statuses[index] = Some(DownloadStatus::SkippedByRange);
                    continue;
                }
            }

            let Some(episode_title) = episode_title else {
                statuses[index] = Some(DownloadStatus::NotDownloadable);
                continue;
            };

            let directory_name = format!(
                "{episode_no:04}. {name}",
                name = stdx::fs::safe_name(episode_title)
            );
            let episode_directory = webtoon_directory.join(&directory_name);

            // A plain file where the episode directory belongs.
            let file_on_disk = episode_directory.is_file();
            let file_in_snapshot = snapshot.is_some_and(|snapshot| snapshot.is_file(&directory_name));
            if file_on_disk || file_in_snapshot {
                if options.existing_episode == ExistingEpisodePolicy::Skip {
                    statuses[index] = Some(if file_on_disk {
                        DownloadStatus::AlreadyExist
                    } else {
                        DownloadStatus::SkippedBySnapshot
                    });
                    continue;
                }
                return Err(DownloadError::Conflict {
                    path: episode_directory,
                });
            }

            // Union of the real listing and the snapshot's recorded one.
            let mut existing: BTreeSet<String> = BTreeSet::new();
            if episode_directory.is_dir() {
                for entry in episode_directory.read_dir()? {
                    existing.insert(entry?.file_name().to_string_lossy().into_owned());
                }
            }
            let only_in_snapshot = existing.is_empty();
            if let Some(snapshot) = snapshot {
                existing.extend(
                    snapshot
                        .children(&directory_name)
                        .into_iter()
                        .map(str::to_owned),
                );
            }

            if !existing.is_empty() {
                match options.existing_episode {
                    ExistingEpisodePolicy::Raise => {
                        return Err(DownloadError::Conflict {
                            path: episode_directory,
                        });
                    }
                    ExistingEpisodePolicy::Skip => {
                        statuses[index] = Some(if only_in_snapshot {
                            DownloadStatus::SkippedBySnapshot
                        } else {
                            DownloadStatus::AlreadyExist
                        });
                        continue;
                    }
                    ExistingEpisodePolicy::DownloadAgain | ExistingEpisodePolicy::HardCheck => {}
                }
            }

            tokio::time::sleep(self.scraper.download_interval()).await;

            let urls = self.scraper.get_episode_image_urls(index).await?;
            let Some(urls) = urls.filter(|urls| !urls.is_empty()) else {
                warn!("episode {episode_no} (`{episode_title}`) has no downloadable images");
                statuses[index] = Some(DownloadStatus::Failed);
                if episode_directory.is_dir() && episode_directory.read_dir()?.next().is_none() {
                    std::fs::remove_dir(&episode_directory)?;
                }
                continue;
            };

            if !existing.is_empty() {
                if options.existing_episode == ExistingEpisodePolicy::HardCheck {
                    #[allow(clippy::unwrap_used, reason = "images always carry a pattern")]
                    let image_pattern = DirectoryState::Image { merged: false }
                        .pattern(Precision::Strict)
                        .unwrap();

                    let complete = existing.len() == urls.len()
                        && existing.iter().all(|name| image_pattern.is_match(name));
                    if complete {
                        statuses[index] = Some(DownloadStatus::AlreadyExist);
                        continue;
                    }
                }

                if episode_directory.exists() {
                    std::fs::remove_dir_all(&episode_directory)?;
                }
            }

            std::fs::create_dir_all(&episode_directory)?;

            let fallback_extension = self.scraper.default_file_extension();
            let downloads = urls.iter().enumerate().map(|(image_no, url)| {
                download_image(
                    &self.client,
                    url,
                    &episode_directory,
                    image_no,
                    fallback_extension,
                )
            });

            if let Err(error) = futures::future::try_join_all(downloads).await {
                std::fs::remove_dir_all(&episode_directory)?;
                return Err(error);
            }

            statuses[index] = Some(DownloadStatus::Downloaded);
            info!("episode {episode_no} (`{episode_title}`) downloaded");
        }

        Ok(())
    }

    fn finalize(
        &self,
        webtoon_directory: &Path,
        final_directory: &Path,
        directory_name: &str,
        thumbnail_name: Option<String>,
        statuses: &[Option<DownloadStatus>],
        previous: &Manifest,
    ) -> Result<(), DownloadError> {
        let mut manifest = Manifest::new();

        {
            let information = self.scraper.information()?;
            manifest.set("title", &information.title)?;
            manifest.set("platform", self.scraper.platform())?;
            manifest.set(
                "webtoon_thumbnail_url",
                information.thumbnail_url.as_ref().map(Url::as_str),
            )?;
            manifest.set("episode_ids", &information.episode_ids)?;
            manifest.set("episode_titles", &information.episode_titles)?;
            manifest.set("author", &information.author)?;
        }

        manifest.set("download_status", statuses)?;
        manifest.set("thumbnail_name", thumbnail_name)?;
        manifest.set("information_name", INFORMATION_FILE)?;
        if final_directory != webtoon_directory {
            manifest.set("original_webtoon_directory_name", directory_name)?;
        }

        let mut contents: Vec<String> = final_directory
            .read_dir()?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        contents.sort_unstable();
        manifest.set("contents", &contents)?;

        self.scraper.manifest_extras(&mut manifest)?;
        manifest.merge_from(previous);
        manifest.write(final_directory, &["credentials"])?;

        Ok(())
    }
}

async fn download_image(
    client: &reqwest::Client,
    url: &Url,
    episode_directory: &Path,
    image_no: usize,
    fallback_extension: Option<&'static str>,
) -> Result<(), DownloadError> {
    let extension = stdx::fs::file_extension(url.as_str())
        .or_else(|| fallback_extension.map(str::to_owned))
        .unwrap_or_else(|| "jpg".to_owned());

    let response = send_with_retry(client.get(url.clone()))
        .await?
        .error_for_status()?;
    let bytes = response.bytes().await?;

    let path = episode_directory.join(format!("{image_no:03}.{extension}"));
    tokio::fs::write(&path, &bytes).await?;

    Ok(())
}
