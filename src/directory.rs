//! Classification of file and directory names against the on-disk naming
//! grammar used by downloads.
//!
//! Every tool that reworks a downloaded tree (merge, unshuffle, resume) first
//! asks this module what shape the tree is in. Classification is
//! all-or-nothing: a container is only recognized when every structural child
//! matches the same pattern, anything else is [`DirectoryState::NotMatched`].

use regex::Regex;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

/// How strictly names are matched.
///
/// [`Precision::Strict`] requires the fixed zero-padded digit widths that the
/// downloader itself produces. [`Precision::Tolerant`] accepts variable-width
/// numbers so that trees produced by older, looser naming can still be
/// recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Fixed-width zero-padded numbers.
    Strict,
    /// Variable-width numbers.
    Tolerant,
}

/// The recognized shape of a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// A single picture file within an episode directory.
    ///
    /// Unmerged images are named `023.jpg`; merged ones carry their episode
    /// prefix, `0001.001. Episode Name.jpg`.
    Image {
        /// Whether the image carries a merged-episode prefix.
        merged: bool,
    },
    /// A directory holding one episode's images.
    ///
    /// `0001. Episode Name` when unmerged, `0001~0005` when merged. `None`
    /// means the distinction is unknown.
    EpisodeDirectory {
        /// Whether the episode directory is a merged group.
        merged: Option<bool>,
    },
    /// A directory holding all episode directories of one webtoon,
    /// `Title(12345)` with optional trailing tags like `Title(12345, HD)`.
    WebtoonDirectory {
        /// Whether the contained episode directories are merged groups.
        /// `None` when only the name was inspected.
        merged: Option<bool>,
    },
    /// A directory holding multiple webtoon directories.
    WebtoonDirectoryContainer,
    /// Anything that does not fit the grammar.
    NotMatched {
        /// Whether the path is safe to treat as a fresh download target.
        ///
        /// `Some(true)` for a missing or unrecognizable-but-harmless
        /// location, `Some(false)` for an existing unrelated file, `None`
        /// when undetermined.
        resumable: Option<bool>,
    },
}

static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<image_no>\d{3})\.(?P<extension>[a-zA-Z0-9]{3,4})$").unwrap()
});

static IMAGE_TOLERANT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<image_no>\d+)\.(?P<extension>[a-zA-Z0-9]+)$").unwrap()
});

static EPISODE_DIRECTORY: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<episode_no>\d{4})\. (?P<episode_name>.+)$").unwrap()
});

static EPISODE_DIRECTORY_TOLERANT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<episode_no>\d+)\. (?P<episode_name>.+)$").unwrap()
});

static MERGED_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(
        r"^(?P<episode_no>\d{4})\.(?P<image_no>\d{3})\. (?P<episode_name>.+)\.(?P<extension>[a-zA-Z]{3,4})$",
    )
    .unwrap()
});

static MERGED_IMAGE_TOLERANT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(
        r"^(?P<episode_no>\d+)\.(?P<image_no>\d+)\. (?P<episode_name>.+)\.(?P<extension>[a-zA-Z]+)$",
    )
    .unwrap()
});

static MERGED_EPISODE_DIRECTORY: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<from>\d{4})~(?P<to>\d{4})$").unwrap()
});

static MERGED_EPISODE_DIRECTORY_TOLERANT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<from>\d+)~(?P<to>\d+)$").unwrap()
});

static WEBTOON_DIRECTORY: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<webtoon_name>.+)\((?P<webtoon_id>.+?)(?:, (?:HD|shuffled|concatenated))*\)$")
        .unwrap()
});

static WEBTOON_DIRECTORY_TOLERANT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used, reason = "regex is valid and covered by tests")]
    Regex::new(r"^(?P<webtoon_name>.+)\((?P<webtoon_id>.+?)(?:, \w+)*\)$").unwrap()
});

impl DirectoryState {
    /// The naming pattern associated with this state, if the state is
    /// identifiable from a name alone.
    ///
    /// [`DirectoryState::WebtoonDirectory`] returns the same pattern for both
    /// merged flags; the distinction only exists at the container level.
    pub fn pattern(self, precision: Precision) -> Option<&'static Regex> {
        let regex = match (self, precision) {
            (Self::Image { merged: false }, Precision::Strict) => &*IMAGE,
            (Self::Image { merged: false }, Precision::Tolerant) => &*IMAGE_TOLERANT,
            (Self::Image { merged: true }, Precision::Strict) => &*MERGED_IMAGE,
            (Self::Image { merged: true }, Precision::Tolerant) => &*MERGED_IMAGE_TOLERANT,
            (Self::EpisodeDirectory { merged: Some(false) }, Precision::Strict) => {
                &*EPISODE_DIRECTORY
            }
            (Self::EpisodeDirectory { merged: Some(false) }, Precision::Tolerant) => {
                &*EPISODE_DIRECTORY_TOLERANT
            }
            (Self::EpisodeDirectory { merged: Some(true) }, Precision::Strict) => {
                &*MERGED_EPISODE_DIRECTORY
            }
            (Self::EpisodeDirectory { merged: Some(true) }, Precision::Tolerant) => {
                &*MERGED_EPISODE_DIRECTORY_TOLERANT
            }
            (Self::WebtoonDirectory { .. }, Precision::Strict) => &*WEBTOON_DIRECTORY,
            (Self::WebtoonDirectory { .. }, Precision::Tolerant) => &*WEBTOON_DIRECTORY_TOLERANT,
            (
                Self::EpisodeDirectory { merged: None }
                | Self::WebtoonDirectoryContainer
                | Self::NotMatched { .. },
                _,
            ) => return None,
        };

        Some(regex)
    }

    /// Promotes an item-level state to the state of the directory that would
    /// contain such items.
    pub fn to_container(self) -> Self {
        match self {
            Self::Image { merged } => Self::EpisodeDirectory {
                merged: Some(merged),
            },
            Self::EpisodeDirectory { merged } => Self::WebtoonDirectory { merged },
            Self::WebtoonDirectory { .. } => Self::WebtoonDirectoryContainer,
            Self::WebtoonDirectoryContainer | Self::NotMatched { .. } => {
                Self::NotMatched { resumable: None }
            }
        }
    }
}

/// Name-level states in classification priority order.
const NAME_STATES: [DirectoryState; 5] = [
    DirectoryState::Image { merged: false },
    DirectoryState::EpisodeDirectory {
        merged: Some(false),
    },
    DirectoryState::Image { merged: true },
    DirectoryState::EpisodeDirectory { merged: Some(true) },
    DirectoryState::WebtoonDirectory { merged: None },
];

/// Classifies a single file or directory name.
///
/// Patterns are tried in a fixed priority order; the first match wins. A name
/// that fits none returns `NotMatched { resumable: None }`.
pub fn classify_name(name: &str, precision: Precision) -> DirectoryState {
    for state in NAME_STATES {
        #[allow(clippy::unwrap_used, reason = "every name-level state has a pattern")]
        if state.pattern(precision).unwrap().is_match(name) {
            return state;
        }
    }

    DirectoryState::NotMatched { resumable: None }
}

/// Entries that never participate in structural voting: single-underscore
/// prefixed auxiliary files (double underscore stays structural) and
/// `.snapshots` sidecars.
fn is_opaque(name: &str) -> bool {
    (name.starts_with('_') && !name.starts_with("__")) || name.ends_with(".snapshots")
}

/// Classifies a directory by the unanimous shape of its contents.
///
/// A missing path is a fresh, resumable target. A regular file is a conflict.
/// A directory with no subdirectories is classified by a unanimous vote over
/// its (non-opaque) file names; with subdirectories, every subdirectory name
/// must match the same pattern. Any disagreement is `NotMatched`.
pub fn classify_container(path: &Path, precision: Precision) -> io::Result<DirectoryState> {
    if !path.exists() {
        return Ok(DirectoryState::NotMatched {
            resumable: Some(true),
        });
    }

    if path.is_file() {
        return Ok(DirectoryState::NotMatched {
            resumable: Some(false),
        });
    }

    let mut directories = Vec::new();
    let mut files = Vec::new();

    for entry in path.read_dir()? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if is_opaque(&name) {
            continue;
        }

        if entry.file_type()?.is_dir() {
            directories.push(name);
        } else {
            files.push(name);
        }
    }

    if directories.is_empty() {
        let mut vote: Option<DirectoryState> = None;

        for file in &files {
            let state = classify_name(file, precision);

            match vote {
                Some(previous) if previous != state => {
                    return Ok(DirectoryState::NotMatched {
                        resumable: Some(true),
                    });
                }
                _ => vote = Some(state),
            }
        }

        return Ok(match vote {
            Some(DirectoryState::NotMatched { .. }) | None => DirectoryState::NotMatched {
                resumable: Some(true),
            },
            Some(state) => state.to_container(),
        });
    }

    for state in NAME_STATES {
        #[allow(clippy::unwrap_used, reason = "every name-level state has a pattern")]
        let pattern = state.pattern(precision).unwrap();

        if directories.iter().all(|name| pattern.is_match(name)) {
            return Ok(state.to_container());
        }
    }

    Ok(DirectoryState::NotMatched { resumable: None })
}

/// Guesses by what group size a merged webtoon directory was merged.
///
/// Takes the most frequent `to - from` difference across merged episode
/// directory names; ties resolve to the first difference encountered in
/// sorted listing order. `None` when nothing in the directory looks merged.
pub fn guess_merge_number(path: &Path) -> io::Result<Option<u32>> {
    let mut names = Vec::new();

    for entry in path.read_dir()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort_unstable();

    let pattern = &*MERGED_EPISODE_DIRECTORY;
    let mut counter: Vec<(u32, usize)> = Vec::new();

    for name in &names {
        let Some(captures) = pattern.captures(name) else {
            continue;
        };

        let (Ok(from), Ok(to)) = (captures["from"].parse::<u32>(), captures["to"].parse::<u32>())
        else {
            continue;
        };

        let diff = to.saturating_sub(from);

        match counter.iter_mut().find(|(value, _)| *value == diff) {
            Some((_, count)) => *count += 1,
            None => counter.push((diff, 1)),
        }
    }

    // First-encountered wins a tie, so `>` rather than `>=`.
    let mut best: Option<(u32, usize)> = None;
    for (diff, count) in counter {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((diff, count));
        }
    }

    Ok(best.map(|(diff, _)| diff))
}
