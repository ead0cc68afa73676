//! Application configuration.
//!
//! All settings have working defaults. They can be loaded from a JSON document in which every
//! section and field is optional, and some of them can be overridden by environment variables.

use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;
use crate::error::LibraryError;
use crate::feature::{FeatureConfig, FeatureExtractor};
use crate::library::SignLibrary;
use crate::matcher::{MatcherConfig, SequenceMatcher};
use crate::recorder::{RecorderConfig, SignRecorder};

const ENV_LIBRARY: &str = "HANDSIGN_LIBRARY";
const ENV_THRESHOLD: &str = "HANDSIGN_THRESHOLD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference library document or directory.
    pub library: Option<PathBuf>,
    pub features: FeatureConfig,
    pub matcher: MatcherConfig,
    pub recorder: RecorderConfig,
    pub capture: CaptureConfig,
}

/// Whether [`Config::load_library`] found a usable reference library.
#[derive(Debug)]
pub enum LibraryStatus {
    Loaded,
    /// No library path was configured.
    NotConfigured,
    /// The configured library could not be loaded.
    Unavailable(LibraryError),
}

impl LibraryStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LibraryStatus::Loaded)
    }
}

impl Config {
    /// Loads a configuration document.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Applies overrides from the `HANDSIGN_*` environment variables.
    ///
    /// Variables with unusable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(ENV_LIBRARY).filter(|path| !path.is_empty()) {
            log::debug!("{}={}", ENV_LIBRARY, path);
            self.library = Some(path.into());
        }

        if let Some(value) = var(ENV_THRESHOLD) {
            match value.trim().parse::<f32>() {
                Ok(threshold) if threshold.is_finite() && threshold >= 0.0 => {
                    log::debug!("{}={}", ENV_THRESHOLD, threshold);
                    self.matcher = self.matcher.clone().threshold(threshold);
                }
                _ => log::warn!(
                    "ignoring invalid {} value '{}' (expected a non-negative number)",
                    ENV_THRESHOLD,
                    value,
                ),
            }
        }
    }

    /// Loads the configured reference library.
    ///
    /// If no library is configured, or it can't be loaded, an empty library is returned along
    /// with the reason. Recognition still works with it, but every gesture is reported as
    /// unknown.
    pub fn load_library(&self) -> (Arc<SignLibrary>, LibraryStatus) {
        let Some(path) = &self.library else {
            log::warn!(
                "no reference library configured (set {} or `library`)",
                ENV_LIBRARY
            );
            return (Arc::new(SignLibrary::empty()), LibraryStatus::NotConfigured);
        };

        match SignLibrary::load(path) {
            Ok(library) => (Arc::new(library), LibraryStatus::Loaded),
            Err(e) => {
                log::error!("{}; continuing without reference signs", e);
                (
                    Arc::new(SignLibrary::empty()),
                    LibraryStatus::Unavailable(e),
                )
            }
        }
    }

    /// Returns these settings adapted to replaying recorded streams.
    ///
    /// Frames are processed as fast as they can be read, and recordings are only limited by their
    /// frame count. Where a replayed recording gets cut then does not depend on processing speed.
    pub fn for_replay(&self) -> Self {
        Self {
            recorder: self.recorder.clone().max_duration(Duration::MAX),
            capture: self.capture.clone().frame_interval(Duration::ZERO),
            ..self.clone()
        }
    }

    pub fn extractor(&self) -> FeatureExtractor {
        FeatureExtractor::new(self.features.clone())
    }

    pub fn matcher(&self) -> SequenceMatcher {
        SequenceMatcher::new(self.matcher.clone())
    }

    /// Creates a [`SignRecorder`] using `library` and the configured settings.
    pub fn recorder(&self, library: Arc<SignLibrary>) -> SignRecorder {
        SignRecorder::new(
            library,
            self.extractor(),
            self.matcher(),
            self.recorder.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ReferenceSign;
    use crate::test::{scratch_dir, sequence};

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn partial_document() {
        let dir = scratch_dir("config-partial");
        let path = dir.join("config.json");
        fs::write(
            &path,
            r#"{ "matcher": { "threshold": 0.25 }, "capture": { "frame_interval_ms": 0 } }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.matcher, MatcherConfig::default().threshold(0.25));
        assert_eq!(config.capture.frame_interval_duration(), Duration::ZERO);
        assert_eq!(config.recorder, RecorderConfig::default());
        assert_eq!(config.library, None);
    }

    #[test]
    fn replay_settings() {
        let config = Config {
            recorder: RecorderConfig::default().max_frames(Some(40)),
            ..Config::default()
        };
        let replay = config.for_replay();
        assert_eq!(replay.capture.frame_interval_duration(), Duration::ZERO);
        assert_eq!(replay.recorder.max_frames_limit(), Some(40));
        assert!(replay.recorder.max_duration_limit() > Duration::from_secs(3600 * 24 * 365));
        assert_eq!(replay.matcher, config.matcher);
    }

    #[test]
    fn invalid_document() {
        let dir = scratch_dir("config-invalid");
        let path = dir.join("config.json");
        fs::write(&path, "{ matcher: }").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("invalid config file"), "{}", err);
        assert!(Config::load(dir.join("missing.json")).is_err());
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        config.apply_vars(vars(&[
            ("HANDSIGN_LIBRARY", "/srv/signs"),
            ("HANDSIGN_THRESHOLD", " 0.8 "),
        ]));
        assert_eq!(config.library, Some(PathBuf::from("/srv/signs")));
        assert_eq!(config.matcher.acceptance_threshold(), 0.8);

        config.apply_vars(vars(&[("HANDSIGN_THRESHOLD", "lots")]));
        assert_eq!(config.matcher.acceptance_threshold(), 0.8);
        config.apply_vars(vars(&[("HANDSIGN_THRESHOLD", "-1")]));
        assert_eq!(config.matcher.acceptance_threshold(), 0.8);
    }

    #[test]
    fn degraded_library() {
        let (library, status) = Config::default().load_library();
        assert!(library.is_empty());
        assert!(matches!(status, LibraryStatus::NotConfigured));

        let config = Config {
            library: Some(scratch_dir("config-degraded").join("nope.json")),
            ..Config::default()
        };
        let (library, status) = config.load_library();
        assert!(library.is_empty());
        assert!(matches!(status, LibraryStatus::Unavailable(LibraryError::Io { .. })));

        let mut recorder = config.recorder(library);
        recorder.start_recording();
        assert!(recorder.stop_recording().unwrap().label().is_unknown());
    }

    #[test]
    fn loads_configured_library() {
        let dir = scratch_dir("config-library");
        let path = dir.join("signs.json");
        let template = sequence(&[&[0.0, 1.0], &[1.0, 0.0]]);
        SignLibrary::from_signs([ReferenceSign::new("A", vec![template])])
            .save(&path)
            .unwrap();

        let config = Config {
            library: Some(path),
            ..Config::default()
        };
        let (library, status) = config.load_library();
        assert!(status.is_loaded());
        assert_eq!(library.len(), 1);
    }
}
