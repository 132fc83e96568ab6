//! Merging episode directories into fixed-size groups and back.
//!
//! Merging turns `0001. First` .. `0005. Fifth` into one `0001~0005`
//! directory whose images carry their episode prefix
//! (`0001.001. First.jpg`), for read-through viewing. Restoring is the
//! exact inverse. Both operations refuse to touch a tree they cannot fully
//! classify.

use crate::directory::{DirectoryState, Precision, classify_container};
use crate::errors::{DirectoryStateError, MergeError};
use crate::manifest::{INFORMATION_FILE, Manifest};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Merges the episode directories of an unmerged webtoon directory into
/// groups of `merge_number` consecutive episodes.
///
/// Episodes group by `(episode_no - 1) / merge_number`; each group directory
/// is named after the smallest and largest episode number actually present
/// in it, so gaps from undownloaded episodes are tolerated. Auxiliary files
/// (thumbnail, manifest, underscore-prefixed entries) stay in place. The
/// merge number is recorded in the manifest when one exists.
pub fn merge_webtoon(webtoon_directory: &Path, merge_number: u32) -> Result<(), MergeError> {
    if merge_number == 0 {
        return Err(MergeError::InvalidMergeNumber(merge_number));
    }

    let state = classify_container(webtoon_directory, Precision::Strict)?;
    if state
        != (DirectoryState::WebtoonDirectory {
            merged: Some(false),
        })
    {
        return Err(DirectoryStateError::NotUnmergedWebtoonDirectory {
            path: webtoon_directory.to_path_buf(),
        }
        .into());
    }

    let episode_state = DirectoryState::EpisodeDirectory {
        merged: Some(false),
    };
    #[allow(clippy::unwrap_used, reason = "episode directories always carry a pattern")]
    let episode_pattern = episode_state.pattern(Precision::Strict).unwrap();
    #[allow(clippy::unwrap_used, reason = "images always carry a pattern")]
    let image_pattern = DirectoryState::Image { merged: false }
        .pattern(Precision::Strict)
        .unwrap();

    // group index -> (episode_no, episode_name, directory name)
    let mut groups: BTreeMap<u32, Vec<(u32, String, String)>> = BTreeMap::new();

    for entry in webtoon_directory.read_dir()? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(captures) = episode_pattern.captures(&name) else {
            continue;
        };

        let episode_no: u32 = captures["episode_no"]
            .parse()
            .map_err(|error| anyhow::Error::from(error))?;
        let episode_name = captures["episode_name"].to_owned();

        groups
            .entry(episode_no.saturating_sub(1) / merge_number)
            .or_default()
            .push((episode_no, episode_name, name));
    }

    for episodes in groups.values() {
        #[allow(clippy::unwrap_used, reason = "groups are never created empty")]
        let from = episodes.iter().map(|(no, _, _)| *no).min().unwrap();
        #[allow(clippy::unwrap_used, reason = "groups are never created empty")]
        let to = episodes.iter().map(|(no, _, _)| *no).max().unwrap();

        let group_directory = webtoon_directory.join(format!("{from:04}~{to:04}"));
        fs::create_dir(&group_directory)?;

        for (episode_no, episode_name, directory_name) in episodes {
            let episode_directory = webtoon_directory.join(directory_name);

            for image in episode_directory.read_dir()? {
                let image = image?;
                let image_name = image.file_name().to_string_lossy().into_owned();

                let Some(captures) = image_pattern.captures(&image_name) else {
                    continue;
                };

                let merged_name = format!(
                    "{episode_no:04}.{image_no}. {episode_name}.{extension}",
                    image_no = &captures["image_no"],
                    extension = &captures["extension"],
                );
                fs::rename(image.path(), group_directory.join(merged_name))?;
            }

            fs::remove_dir(&episode_directory)?;
        }
    }

    if webtoon_directory.join(INFORMATION_FILE).exists() {
        let mut manifest = Manifest::load(webtoon_directory)?;
        manifest.set("merge_number", merge_number)?;
        manifest.write(webtoon_directory, &[])?;
    }

    Ok(())
}

/// Restores a merged webtoon directory back to one directory per episode.
pub fn restore_webtoon(webtoon_directory: &Path) -> Result<(), MergeError> {
    let state = classify_container(webtoon_directory, Precision::Strict)?;
    if state != (DirectoryState::WebtoonDirectory { merged: Some(true) }) {
        return Err(DirectoryStateError::NotMergedWebtoonDirectory {
            path: webtoon_directory.to_path_buf(),
        }
        .into());
    }

    let merged_state = DirectoryState::EpisodeDirectory { merged: Some(true) };
    #[allow(clippy::unwrap_used, reason = "merged episode directories always carry a pattern")]
    let merged_pattern = merged_state.pattern(Precision::Strict).unwrap();
    #[allow(clippy::unwrap_used, reason = "merged images always carry a pattern")]
    let merged_image_pattern = DirectoryState::Image { merged: true }
        .pattern(Precision::Strict)
        .unwrap();

    for entry in webtoon_directory.read_dir()? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if !entry.file_type()?.is_dir() || !merged_pattern.is_match(&name) {
            continue;
        }

        let group_directory = entry.path();

        for image in group_directory.read_dir()? {
            let image = image?;
            let image_name = image.file_name().to_string_lossy().into_owned();

            let Some(captures) = merged_image_pattern.captures(&image_name) else {
                continue;
            };

            let episode_directory = webtoon_directory.join(format!(
                "{episode_no}. {episode_name}",
                episode_no = &captures["episode_no"],
                episode_name = &captures["episode_name"],
            ));
            fs::create_dir_all(&episode_directory)?;

            let restored_name = format!(
                "{image_no}.{extension}",
                image_no = &captures["image_no"],
                extension = &captures["extension"].to_ascii_lowercase(),
            );
            fs::rename(image.path(), episode_directory.join(restored_name))?;
        }

        fs::remove_dir(&group_directory)?;
    }

    if webtoon_directory.join(INFORMATION_FILE).exists() {
        let mut manifest = Manifest::load(webtoon_directory)?;
        manifest.remove("merge_number");
        manifest.write(webtoon_directory, &[])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn listing(path: &Path) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = path
            .read_dir()?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<anyhow::Result<_>>()?;
        names.sort_unstable();
        Ok(names)
    }

    fn seed_unmerged(root: &Path, episodes: u32, images: u32) -> anyhow::Result<()> {
        for episode in 1..=episodes {
            let directory = root.join(format!("{episode:04}. Episode {episode}"));
            fs::create_dir(&directory)?;
            for image in 0..images {
                fs::write(directory.join(format!("{image:03}.jpg")), b"img")?;
            }
        }
        Ok(())
    }

    #[test]
    fn merge_should_group_and_prefix_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_unmerged(temp.path(), 5, 2)?;

        merge_webtoon(temp.path(), 2)?;

        assert_eq!(
            vec!["0001~0002", "0003~0004", "0005~0005"],
            listing(temp.path())?
        );
        assert_eq!(
            vec![
                "0001.000. Episode 1.jpg",
                "0001.001. Episode 1.jpg",
                "0002.000. Episode 2.jpg",
                "0002.001. Episode 2.jpg",
            ],
            listing(&temp.path().join("0001~0002"))?
        );

        Ok(())
    }

    #[test]
    fn merge_then_restore_should_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_unmerged(temp.path(), 4, 3)?;
        let before = listing(temp.path())?;

        merge_webtoon(temp.path(), 2)?;
        restore_webtoon(temp.path())?;

        assert_eq!(before, listing(temp.path())?);
        assert_eq!(
            vec!["000.jpg", "001.jpg", "002.jpg"],
            listing(&temp.path().join("0003. Episode 3"))?
        );

        Ok(())
    }

    #[test]
    fn merge_should_record_merge_number_in_manifest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_unmerged(temp.path(), 2, 1)?;

        let mut manifest = Manifest::new();
        manifest.set("title", "Title")?;
        manifest.write(temp.path(), &[])?;

        merge_webtoon(temp.path(), 5)?;

        let manifest = Manifest::load(temp.path())?;
        assert_eq!(Some(5), manifest.get::<u32>("merge_number"));

        Ok(())
    }

    #[test]
    fn merge_should_refuse_an_already_merged_tree() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join("0001~0005"))?;

        let result = merge_webtoon(temp.path(), 2);

        assert!(
            matches!(result, Err(MergeError::DirectoryStateError(_))),
            "expected a directory-state error, got {result:?}"
        );

        Ok(())
    }

    #[test]
    fn restore_should_refuse_an_unmerged_tree() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_unmerged(temp.path(), 2, 1)?;

        let result = restore_webtoon(temp.path());

        assert!(
            matches!(result, Err(MergeError::DirectoryStateError(_))),
            "expected a directory-state error, got {result:?}"
        );

        Ok(())
    }
}
