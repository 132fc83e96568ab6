#![warn(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rust_2018_idioms,
    clippy::panic,
    clippy::map_err_ignore,
    clippy::missing_panics_doc,
    clippy::match_wildcard_for_single_variants,
    clippy::wildcard_in_or_patterns,
    clippy::await_holding_lock,
    clippy::default_trait_access,
    clippy::let_underscore_future,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::manual_range_contains,
    clippy::cast_precision_loss,
    clippy::ptr_as_ptr,
    clippy::get_first,
    clippy::manual_split_once,
    clippy::manual_is_ascii_check,
    clippy::manual_map,
    clippy::manual_async_fn,
    clippy::mutex_integer,
    clippy::needless_pass_by_value,
    clippy::needless_option_as_deref,
    clippy::result_large_err,
    clippy::useless_let_if_seq,
    clippy::match_like_matches_macro,
    clippy::manual_non_exhaustive,
    clippy::unimplemented,
    clippy::manual_ok_or,
    clippy::manual_unwrap_or
)]
#![allow(
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::cargo_common_metadata,
    clippy::multiple_crate_versions,
    clippy::missing_errors_doc,
    clippy::redundant_closure_for_method_calls,
    clippy::redundant_closure
)]
#![forbid(unsafe_code)]
//! Downloader for episodes of webtoons from various platforms.
//!
//! The crate is organized around a [`Downloader`](download::Downloader) that
//! drives a platform collaborator (a [`WebtoonScraper`](platform::WebtoonScraper)
//! implementation) through metadata fetching, episode downloads, optional
//! post-processing, and persistence of an `information.json` manifest.
//!
//! Smaller pieces are usable on their own:
//!
//! - [`directory`] classifies file and directory names against the on-disk
//!   naming grammar used by downloads.
//! - [`range`] parses episode range expressions like `"1~10,!3"`.
//! - [`unshuffle`] restores images that were delivered as shuffled tile grids.
//! - [`merge`] merges episode directories into fixed-size groups and back.
mod stdx;

pub mod directory;
pub mod download;
pub mod errors;
pub mod manifest;
pub mod merge;
pub mod platform;
pub mod range;
pub mod snapshot;
pub mod unshuffle;
