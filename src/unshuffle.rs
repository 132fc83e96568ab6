//! Reassembly of tile-shuffled episode images.
//!
//! One platform scrambles every image into a 5x5 grid of tiles permuted by a
//! pseudorandom generator seeded with the episode's integer id. Knowing the
//! id is enough to regenerate the permutation and put the tiles back.

use crate::directory::{DirectoryState, Precision, classify_container};
use crate::errors::UnshuffleError;
use crate::manifest::Manifest;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView as _, imageops};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

/// Tiles per side of the shuffle grid.
const GRID: u32 = 5;

/// Worker threads used when the caller does not ask for a specific count.
pub fn default_thread_number() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |cores| cores.get());
    if cores < 2 { 1 } else { (cores / 2).max(10) }
}

/// Reproduces the platform's pseudorandom sequence for a seed.
///
/// 25 rounds of a 64-bit xorshift recurrence, each emitting
/// `(state >> 32) % 25`. Same seed, same sequence, no other entropy.
fn generate_random(seed: u64) -> [usize; 25] {
    let mut results = [0usize; 25];
    let mut state = seed;

    for result in &mut results {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        #[allow(clippy::as_conversions, reason = "value is already reduced mod 25")]
        {
            *result = ((state >> 32) % 25) as usize;
        }
    }

    results
}

/// Realizes the tile permutation for an episode id.
///
/// The generated numbers drive a fixed sequence of swaps over `0..25`;
/// `order[slot]` names the grid position whose tile belongs at `slot`.
pub fn image_order(episode_id: u64) -> [usize; 25] {
    let random = generate_random(episode_id);

    let mut order = [0usize; 25];
    for (slot, value) in order.iter_mut().enumerate() {
        *value = slot;
    }

    for (i, swap) in random.into_iter().enumerate() {
        order.swap(i, swap);
    }

    order
}

/// Unshuffles every episode of a webtoon directory into `target`.
///
/// `source` must be an unmerged webtoon directory. When `episode_ids` is
/// `None` they are recovered from the co-located `information.json`
/// (`episode_int_ids`); ids are indexed by the episode number in each
/// directory name. Non-episode files (thumbnail, manifest) are copied over
/// as-is. Episodes are processed on a bounded worker pool; one failing
/// episode is logged and its partial output removed, siblings are untouched.
pub fn unshuffle_webtoon(
    source: &Path,
    target: &Path,
    episode_ids: Option<&[i64]>,
    thread_number: Option<usize>,
) -> Result<(), UnshuffleError> {
    let state = classify_container(source, Precision::Strict)?;
    if state
        != (DirectoryState::WebtoonDirectory {
            merged: Some(false),
        })
    {
        return Err(crate::errors::DirectoryStateError::NotUnmergedWebtoonDirectory {
            path: source.to_path_buf(),
        }
        .into());
    }

    let recovered;
    let episode_ids = match episode_ids {
        Some(ids) => ids,
        None => {
            let manifest =
                Manifest::load(source).map_err(|_| UnshuffleError::MissingEpisodeIds)?;
            recovered = manifest
                .get::<Vec<i64>>("episode_int_ids")
                .ok_or(UnshuffleError::MissingEpisodeIds)?;
            &recovered
        }
    };

    fs::create_dir_all(target)?;

    let mut episodes = Vec::new();
    let mut names = Vec::new();
    for entry in source.read_dir()? {
        let entry = entry?;
        names.push((entry.file_name().to_string_lossy().into_owned(), entry.file_type()?.is_dir()));
    }
    names.sort_unstable();

    for (name, is_dir) in names {
        if !is_dir {
            fs::copy(source.join(&name), target.join(&name))?;
            continue;
        }

        let episode = DirectoryState::EpisodeDirectory {
            merged: Some(false),
        };
        #[allow(clippy::unwrap_used, reason = "episode directories always carry a pattern")]
        let Some(captures) = episode.pattern(Precision::Strict).unwrap().captures(&name) else {
            debug!("`{name}` does not look like an episode directory, ignored");
            continue;
        };

        let episode_no: usize = captures["episode_no"]
            .parse()
            .map_err(|error| anyhow::Error::from(error))?;
        let Some(episode_id) = episode_no
            .checked_sub(1)
            .and_then(|index| episode_ids.get(index))
        else {
            warn!("no episode id recorded for `{name}`, skipped");
            continue;
        };

        episodes.push((name, *episode_id));
    }

    let threads = thread_number
        .map_or_else(default_thread_number, |requested| {
            requested.min(default_thread_number())
        })
        .max(1);

    info!(
        "unshuffling {} episodes with {threads} threads, this is CPU-intensive and can take a while",
        episodes.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|error| anyhow::Error::from(error))?;

    pool.scope(|scope| {
        for (name, episode_id) in &episodes {
            scope.spawn(move |_| {
                let source_episode = source.join(name);
                let target_episode = target.join(name);

                #[allow(clippy::cast_sign_loss, reason = "seeding uses the raw bit pattern")]
                let order = image_order(*episode_id as u64);

                match unshuffle_episode(&source_episode, &target_episode, &order) {
                    Ok(()) => info!("episode `{name}` unshuffled"),
                    Err(error) => {
                        warn!("failed to unshuffle `{name}`: {error}");
                        // A half-written episode must not survive.
                        let _removed = fs::remove_dir_all(&target_episode);
                    }
                }
            });
        }
    });

    info!("webtoon unshuffled successfully");
    Ok(())
}

/// Rebuilds one episode directory, delete-then-write.
fn unshuffle_episode(
    source: &Path,
    target: &Path,
    order: &[usize; 25],
) -> Result<(), UnshuffleError> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    fs::create_dir(target)?;

    for entry in source.read_dir()? {
        let entry = entry?;
        let name = entry.file_name();
        unshuffle_image(&entry.path(), &target.join(&name), order)?;
    }

    Ok(())
}

/// Unshuffles a single image file.
///
/// Animated gifs cannot be tiled and are copied verbatim. The bottom rows
/// that do not fill a full tile row are dropped, so the output height is the
/// source height rounded down to a multiple of five.
fn unshuffle_image(
    source: &Path,
    target: &Path,
    order: &[usize; 25],
) -> Result<(), UnshuffleError> {
    if source.extension().is_some_and(|extension| extension == "gif") {
        fs::copy(source, target)?;
        return Ok(());
    }

    let image = image::open(source)?;
    let unshuffled = unshuffle_tiles(&image, order);

    let is_jpeg = source
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            extension.eq_ignore_ascii_case("jpg") || extension.eq_ignore_ascii_case("jpeg")
        });

    if is_jpeg {
        let file = fs::File::create(target)?;
        let encoder = JpegEncoder::new_with_quality(std::io::BufWriter::new(file), 95);
        unshuffled.write_with_encoder(encoder)?;
    } else {
        unshuffled.save(target)?;
    }

    Ok(())
}

/// Moves every tile back to its original grid position.
///
/// Tile boundaries are `i * extent / 5`, matching how the platform cut the
/// image, so edge tiles absorb the rounding remainder of the width.
fn unshuffle_tiles(image: &DynamicImage, order: &[usize; 25]) -> DynamicImage {
    let (width, height) = image.dimensions();
    let height = height - height % GRID;

    let mut assembled = image.crop_imm(0, 0, width, height);

    for slot in 0..(GRID * GRID) {
        #[allow(clippy::as_conversions, reason = "slot index is below 25")]
        let from = order[slot as usize] as u32;

        let (from_x, from_y) = (from % GRID, from / GRID);
        let tile = image.crop_imm(
            from_x * width / GRID,
            from_y * height / GRID,
            (from_x + 1) * width / GRID - from_x * width / GRID,
            (from_y + 1) * height / GRID - from_y * height / GRID,
        );

        let (to_x, to_y) = (slot % GRID, slot / GRID);
        imageops::replace(
            &mut assembled,
            &tile,
            i64::from(to_x * width / GRID),
            i64::from(to_y * height / GRID),
        );
    }

    assembled
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use pretty_assertions::assert_eq;

    #[test]
    fn random_sequence_should_be_deterministic() {
        let first = generate_random(5_069_574_002);
        let second = generate_random(5_069_574_002);

        assert_eq!(first, second);
        assert!(first.iter().all(|value| *value < 25), "values stay below 25");
    }

    #[test]
    fn image_order_should_be_a_bijection() {
        for seed in [1u64, 42, 5_069_574_002, u64::from(u32::MAX)] {
            let mut order = image_order(seed);
            order.sort_unstable();

            let mut expected = [0usize; 25];
            for (slot, value) in expected.iter_mut().enumerate() {
                *value = slot;
            }

            assert_eq!(expected, order, "seed {seed} must permute 0..25");
        }
    }

    /// A 10x10 image where every 2x2 grid cell holds a unique color.
    fn plain_image() -> RgbImage {
        RgbImage::from_fn(10, 10, |x, y| {
            #[allow(clippy::as_conversions, reason = "cell index is below 25")]
            let cell = (x / 2 + (y / 2) * 5) as u8;
            Rgb([cell * 10, cell, 255 - cell])
        })
    }

    #[test]
    fn unshuffle_should_invert_the_tile_permutation() {
        let order = image_order(777);
        let plain = plain_image();

        // Place the plain tile of slot `t` at shuffled position `order[t]`.
        let mut shuffled = RgbImage::new(10, 10);
        for (slot, from) in order.iter().enumerate() {
            #[allow(clippy::as_conversions, reason = "slot index is below 25")]
            let (slot, from) = (slot as u32, *from as u32);
            for dx in 0..2 {
                for dy in 0..2 {
                    let pixel = *plain.get_pixel((slot % 5) * 2 + dx, (slot / 5) * 2 + dy);
                    shuffled.put_pixel((from % 5) * 2 + dx, (from / 5) * 2 + dy, pixel);
                }
            }
        }

        let restored = unshuffle_tiles(&DynamicImage::ImageRgb8(shuffled), &order);

        assert_eq!(
            DynamicImage::ImageRgb8(plain).to_rgb8().into_raw(),
            restored.to_rgb8().into_raw()
        );
    }

    #[test]
    fn bottom_margin_rows_should_be_dropped() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 13));
        let order = image_order(1);

        let restored = unshuffle_tiles(&image, &order);

        assert_eq!((10, 10), restored.dimensions());
    }
}
