//! Command line surface of the `toondl` binary.

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use toondl::download::{DownloadOptions, Downloader, ExistingEpisodePolicy};
use toondl::errors::{Error, ScraperError};
use toondl::merge::{merge_webtoon, restore_webtoon};
use toondl::platform::{Options, Platforms, WebtoonScraper, fetch_all};
use toondl::range::EpisodeRange;
use toondl::unshuffle::unshuffle_webtoon;
use url::Url;

#[derive(Parser)]
#[command(name = "toondl", version, about = "Downloads webtoons and reworks their directories")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output; repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Download webtoons by URL, or by id together with --platform
    Download {
        /// Webtoon URLs, or webtoon ids when --platform is given
        #[arg(required = true)]
        webtoons: Vec<String>,

        /// Platform code the ids belong to, e.g. naver_webtoon
        #[arg(short, long)]
        platform: Option<String>,

        /// Episode range expression, e.g. `1~10,!5`
        #[arg(short, long)]
        range: Option<String>,

        /// Base directory webtoon directories are created under
        #[arg(short, long, value_name = "DIR", default_value_os_t = PathBuf::from("webtoon"))]
        directory: PathBuf,

        /// Cookie for authenticated or rated content
        #[arg(long)]
        cookie: Option<String>,

        /// Platform option as key=value; may repeat
        #[arg(short = 'O', long = "option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        options: Vec<(String, String)>,

        /// What to do with episodes that already exist on disk
        #[arg(long, value_enum, default_value_t = ExistingEpisode::Skip)]
        existing_episode: ExistingEpisode,

        /// Print the episode list instead of downloading
        #[arg(long)]
        list_episodes: bool,

        /// Worker count for post-download unshuffling
        #[arg(short = 'N', long)]
        thread_number: Option<usize>,

        /// Bypass cached metadata
        #[arg(long)]
        reload: bool,
    },

    /// Unshuffle a downloaded webtoon directory with tiled images
    Unshuffle {
        /// The shuffled webtoon directory
        webtoon_directory: PathBuf,

        /// Where to write the unshuffled copy; next to the source by default
        #[arg(long, value_name = "DIR")]
        target: Option<PathBuf>,

        /// Worker count
        #[arg(short = 'N', long)]
        thread_number: Option<usize>,
    },

    /// Merge episode directories into fixed-size groups, or undo it
    Merge {
        /// The webtoon directory to rework
        webtoon_directory: PathBuf,

        /// Episodes per merged group
        #[arg(short, long, required_unless_present = "restore", conflicts_with = "restore")]
        merge_number: Option<u32>,

        /// Restore a merged directory back to one directory per episode
        #[arg(long)]
        restore: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
enum ExistingEpisode {
    Skip,
    Raise,
    DownloadAgain,
    HardCheck,
}

impl From<ExistingEpisode> for ExistingEpisodePolicy {
    fn from(policy: ExistingEpisode) -> Self {
        match policy {
            ExistingEpisode::Skip => Self::Skip,
            ExistingEpisode::Raise => Self::Raise,
            ExistingEpisode::DownloadAgain => Self::DownloadAgain,
            ExistingEpisode::HardCheck => Self::HardCheck,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("`{raw}` is not a `key=value` pair"))
}

/// Runs the parsed command to completion.
pub async fn run(cli: Cli, stop: Arc<AtomicBool>) -> Result<(), Error> {
    match cli.command {
        Command::Download {
            webtoons,
            platform,
            range,
            directory,
            cookie,
            options,
            existing_episode,
            list_episodes,
            thread_number,
            reload,
        } => {
            let range = range
                .map(|expression| EpisodeRange::from_string(&expression, true))
                .transpose()?;

            let mut platform_options: Options = options.into_iter().collect();
            if let Some(thread_number) = thread_number {
                platform_options.insert("thread-number".to_owned(), thread_number.to_string());
            }

            let platforms = Platforms::builtin();
            let mut first_failure = None;

            for webtoon in webtoons {
                let result = download_one(
                    &platforms,
                    &webtoon,
                    platform.as_deref(),
                    range.clone(),
                    &directory,
                    cookie.as_deref(),
                    &platform_options,
                    existing_episode.into(),
                    list_episodes,
                    reload,
                    &stop,
                )
                .await;

                if let Err(error) = result {
                    error!("`{webtoon}` failed: {error}");
                    first_failure.get_or_insert(error);
                }
            }

            match first_failure {
                None => Ok(()),
                Some(error) => Err(error),
            }
        }
        Command::Unshuffle {
            webtoon_directory,
            target,
            thread_number,
        } => {
            let target = target.unwrap_or_else(|| unshuffled_sibling(&webtoon_directory));
            unshuffle_webtoon(&webtoon_directory, &target, None, thread_number)?;
            info!("unshuffled into `{target}`", target = target.display());
            Ok(())
        }
        Command::Merge {
            webtoon_directory,
            merge_number,
            restore,
        } => {
            if restore {
                restore_webtoon(&webtoon_directory)?;
            } else if let Some(merge_number) = merge_number {
                merge_webtoon(&webtoon_directory, merge_number)?;
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments, reason = "plain fan-out of the parsed download arguments")]
async fn download_one(
    platforms: &Platforms,
    webtoon: &str,
    platform: Option<&str>,
    range: Option<EpisodeRange>,
    directory: &std::path::Path,
    cookie: Option<&str>,
    platform_options: &Options,
    existing_episode: ExistingEpisodePolicy,
    list_episodes: bool,
    reload: bool,
    stop: &Arc<AtomicBool>,
) -> Result<(), Error> {
    let mut scraper = instantiate(platforms, webtoon, platform)?;

    if let Some(cookie) = cookie {
        scraper.set_cookie(cookie);
    }
    scraper.apply_options(platform_options)?;

    if list_episodes {
        fetch_all(scraper.as_mut(), reload).await?;
        print_episode_list(scraper.as_ref())?;
        return Ok(());
    }

    let mut downloader = Downloader::new(scraper)?.with_stop_handle(Arc::clone(stop));
    let options = DownloadOptions {
        directory: directory.to_path_buf(),
        range,
        existing_episode,
        skip_episodes: BTreeSet::new(),
        reload,
    };

    let webtoon_directory = downloader.download_webtoon(&options).await?;
    info!(
        "`{webtoon}` finished, saved in `{directory}`",
        directory = webtoon_directory.display()
    );

    Ok(())
}

fn instantiate(
    platforms: &Platforms,
    webtoon: &str,
    platform: Option<&str>,
) -> Result<Box<dyn WebtoonScraper>, ScraperError> {
    if let Some(code) = platform {
        return platforms.instantiate(code, webtoon);
    }

    let url = Url::parse(webtoon)?;
    platforms
        .match_url(&url)?
        .ok_or(ScraperError::InvalidUrl("no platform recognizes this URL"))
}

fn print_episode_list(scraper: &dyn WebtoonScraper) -> Result<(), ScraperError> {
    let information = scraper.information()?;

    println!("{title} ({id})", title = information.title, id = scraper.webtoon_id());
    for (index, title) in information.episode_titles.iter().enumerate() {
        match title {
            Some(title) => println!("{episode_no:4} | {title}", episode_no = index + 1),
            None => println!("{episode_no:4} | (not downloadable)", episode_no = index + 1),
        }
    }

    Ok(())
}

/// `Title(id, shuffled)` becomes `Title(id)` next to the source; anything
/// else gets an `, unshuffled` tag instead.
fn unshuffled_sibling(webtoon_directory: &std::path::Path) -> PathBuf {
    let name = webtoon_directory
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let target_name = if let Some(stripped) = name.strip_suffix(", shuffled)") {
        format!("{stripped})")
    } else if let Some(stripped) = name.strip_suffix(")") {
        format!("{stripped}, unshuffled)")
    } else {
        format!("{name}, unshuffled")
    };

    webtoon_directory.with_file_name(target_name)
}
