//! Sign recognition from hand and body landmark streams.
//!
//! The crate turns a stream of [`LandmarkFrame`]s (produced by an external pose/hand landmark
//! estimator) into classified sign labels. It consists of:
//!
//! * the [`feature`] extractor, which turns one frame into a fixed-width [`FeatureVector`],
//! * the reference [`library`] of labeled gesture templates,
//! * the [`matcher`], a dynamic time warping classifier,
//! * the [`recorder`] state machine that decides when a gesture attempt is sampled,
//! * the [`capture`] loop, which drives a video source and an estimator on a worker thread and
//!   dispatches debounced detections to the UI.
//!
//! # 3D Coordinates
//!
//! Landmark coordinates are taken as-is from the estimator. Features are made invariant to the
//! signer's position and distance by translating each body part to an anchor landmark and
//! scaling by a part-specific reference length, so the coordinate system's orientation does not
//! matter as long as it is consistent between the reference library and live input.
//!
//! # Environment Variables
//!
//! Some parts of the configuration can be overridden by setting environment variables (see
//! [`Config::apply_env`]):
//!
//! * `HANDSIGN_LIBRARY`: Path of the reference sign library to load, either a library document
//!   (`.json`) or a directory with one subdirectory per sign.
//! * `HANDSIGN_THRESHOLD`: Acceptance threshold of the matcher. Matches scoring above it are
//!   reported as unknown.
//!
//! [`LandmarkFrame`]: landmark::LandmarkFrame
//! [`FeatureVector`]: feature::FeatureVector
//! [`Config::apply_env`]: config::Config::apply_env

use log::LevelFilter;

pub mod body;
pub mod capture;
pub mod config;
pub mod debounce;
pub mod drop;
pub mod error;
pub mod feature;
pub mod hand;
pub mod landmark;
pub mod library;
pub mod matcher;
pub mod recorder;
pub mod sequence;
pub mod timer;

#[cfg(test)]
mod test;

pub use config::Config;
pub use error::{LibraryError, SessionError};
pub use matcher::{Label, MatchResult};

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `handsign` will log at *trace*
/// level. Otherwise, they will log at *debug* level. `RUST_LOG` is applied on top.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
