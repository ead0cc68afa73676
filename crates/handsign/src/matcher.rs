//! Sequence classification by dynamic time warping.
//!
//! A recorded [`GestureSequence`] is compared against every template of every [`ReferenceSign`]
//! in a [`SignLibrary`]. Sequences are aligned with dynamic time warping (DTW), so signs performed
//! faster, slower or with uneven speed still line up with their templates.
//!
//! The score of an alignment is the *mean* per-frame distance along the optimal warping path:
//! the cumulative cost divided by the number of steps on the path. This keeps scores of sequences
//! with different lengths comparable, so a single acceptance threshold can be used.
//!
//! [`ReferenceSign`]: crate::library::ReferenceSign

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::feature::FeatureVector;
use crate::library::{ReferenceSign, SignLibrary};
use crate::sequence::GestureSequence;
use crate::timer::Timer;

/// The outcome of classifying a gesture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /// The gesture matched the reference sign with this label.
    Sign(Arc<str>),
    /// The gesture was too short, or did not resemble any reference sign closely enough.
    Unknown,
}

impl Label {
    pub fn sign(&self) -> Option<&str> {
        match self {
            Label::Sign(label) => Some(&**label),
            Label::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Label::Unknown)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Sign(label) => f.write_str(label),
            Label::Unknown => f.write_str("unknown"),
        }
    }
}

/// The label chosen for a gesture, along with the score of the best alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    label: Label,
    score: Option<f32>,
}

impl MatchResult {
    /// A result for a gesture that was not compared against anything.
    pub fn unknown() -> Self {
        Self {
            label: Label::Unknown,
            score: None,
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn into_label(self) -> Label {
        self.label
    }

    /// The dissimilarity score of the best template, if any comparison took place.
    ///
    /// This is also reported when the best score was above the acceptance threshold and the
    /// label is [`Label::Unknown`].
    pub fn score(&self) -> Option<f32> {
        self.score
    }
}

/// Distance between the feature vectors of two frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMetric {
    #[default]
    Euclidean,
    Manhattan,
    Chebyshev,
}

impl FrameMetric {
    /// Computes the distance between two equally sized feature vectors.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let diffs = a.iter().zip(b).map(|(a, b)| (a - b).abs());
        match self {
            FrameMetric::Euclidean => diffs.map(|d| d * d).sum::<f32>().sqrt(),
            FrameMetric::Manhattan => diffs.sum(),
            FrameMetric::Chebyshev => diffs.fold(0.0, f32::max),
        }
    }
}

/// Tuning parameters of the [`SequenceMatcher`].
///
/// The defaults were chosen for the default [`FeatureConfig`]: with hand coordinates expressed in
/// palm lengths, a threshold of `0.5` accepts alignments that are off by less than half a palm
/// length per frame on average. They should be recalibrated against a validation set whenever the
/// feature configuration or the reference library changes.
///
/// [`FeatureConfig`]: crate::feature::FeatureConfig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    min_frames: usize,
    threshold: f32,
    tie_epsilon: f32,
    metric: FrameMetric,
    window: Option<usize>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_frames: 5,
            threshold: 0.5,
            tie_epsilon: 1e-6,
            metric: FrameMetric::Euclidean,
            window: None,
        }
    }
}

impl MatcherConfig {
    /// Sets the minimum number of frames a gesture needs to be classified at all.
    ///
    /// Shorter gestures are reported as [`Label::Unknown`] without comparing them to anything.
    #[inline]
    pub fn min_frames(self, min_frames: usize) -> Self {
        Self { min_frames, ..self }
    }

    /// Sets the acceptance threshold. A best score above it yields [`Label::Unknown`].
    #[inline]
    pub fn threshold(self, threshold: f32) -> Self {
        Self { threshold, ..self }
    }

    /// Sets the score difference below which two signs are considered tied.
    ///
    /// Ties are resolved in favor of the sign loaded first.
    #[inline]
    pub fn tie_epsilon(self, tie_epsilon: f32) -> Self {
        Self {
            tie_epsilon,
            ..self
        }
    }

    #[inline]
    pub fn metric(self, metric: FrameMetric) -> Self {
        Self { metric, ..self }
    }

    /// Restricts alignments to a Sakoe-Chiba band: frame `i` of one sequence may only be aligned
    /// with frames `i - window ..= i + window` of the other.
    ///
    /// The window is widened to the length difference of the two sequences if necessary.
    #[inline]
    pub fn window(self, window: Option<usize>) -> Self {
        Self { window, ..self }
    }

    pub fn acceptance_threshold(&self) -> f32 {
        self.threshold
    }
}

/// The score of one reference sign against a candidate gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct SignScore {
    pub label: Arc<str>,
    /// Position of the sign in the library.
    pub index: usize,
    pub score: f32,
}

/// Classifies [`GestureSequence`]s against a [`SignLibrary`].
pub struct SequenceMatcher {
    config: MatcherConfig,
    t_match: Timer,
}

impl SequenceMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            t_match: Timer::new("match"),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_match].into_iter()
    }

    /// Classifies `candidate`.
    ///
    /// This never fails: empty or too short candidates, an empty library, or a library whose
    /// feature width differs from the candidate's all result in [`Label::Unknown`].
    pub fn match_sequence(&self, candidate: &GestureSequence, library: &SignLibrary) -> MatchResult {
        self.t_match.time(|| {
            if candidate.is_empty() || candidate.len() < self.config.min_frames {
                log::debug!(
                    "gesture has {} frames, need at least {}",
                    candidate.len(),
                    self.config.min_frames,
                );
                return MatchResult::unknown();
            }

            let Some(best) = self.best(candidate, library) else {
                log::debug!("no comparable reference sign");
                return MatchResult::unknown();
            };

            if best.score > self.config.threshold {
                log::debug!(
                    "best match '{}' scored {:.3}, above threshold {:.3}",
                    best.label,
                    best.score,
                    self.config.threshold,
                );
                MatchResult {
                    label: Label::Unknown,
                    score: Some(best.score),
                }
            } else {
                log::debug!("matched '{}' with score {:.3}", best.label, best.score);
                MatchResult {
                    label: Label::Sign(best.label),
                    score: Some(best.score),
                }
            }
        })
    }

    /// Scores `candidate` against every sign of `library`, best first.
    ///
    /// Signs without any template of the candidate's feature width are left out. The ranking uses
    /// the same tie rule as [`SequenceMatcher::match_sequence`]: a sign only ranks above one loaded
    /// earlier if it scores better by more than the tie epsilon. The first entry is therefore
    /// always the sign `match_sequence` would pick.
    pub fn scores(&self, candidate: &GestureSequence, library: &SignLibrary) -> Vec<SignScore> {
        let mut remaining = self.sign_scores(candidate, library);
        let mut ranked = Vec::with_capacity(remaining.len());
        while let Some(pos) = self.leader(&remaining) {
            ranked.push(remaining.remove(pos));
        }
        ranked
    }

    fn best(&self, candidate: &GestureSequence, library: &SignLibrary) -> Option<SignScore> {
        let mut scores = self.sign_scores(candidate, library);
        for score in &scores {
            log::trace!("'{}': {:.4}", score.label, score.score);
        }
        let pos = self.leader(&scores)?;
        Some(scores.swap_remove(pos))
    }

    /// Scores of all comparable signs, in library order.
    fn sign_scores(&self, candidate: &GestureSequence, library: &SignLibrary) -> Vec<SignScore> {
        library
            .signs()
            .iter()
            .enumerate()
            .filter_map(|(index, sign)| {
                self.sign_score(candidate, sign).map(|score| SignScore {
                    label: sign.label().clone(),
                    index,
                    score,
                })
            })
            .collect()
    }

    /// Position of the winning entry of `scores`, which must be in library order.
    ///
    /// A later entry only replaces the current leader when it is better by more than
    /// `tie_epsilon`.
    fn leader(&self, scores: &[SignScore]) -> Option<usize> {
        let mut leader: Option<usize> = None;
        for (pos, entry) in scores.iter().enumerate() {
            let better = match leader {
                None => true,
                Some(best) => entry.score < scores[best].score - self.config.tie_epsilon,
            };
            if better {
                leader = Some(pos);
            }
        }
        leader
    }

    /// The best score among the templates of `sign`.
    fn sign_score(&self, candidate: &GestureSequence, sign: &ReferenceSign) -> Option<f32> {
        let dim = candidate.dimension()?;
        sign.templates()
            .iter()
            .filter(|template| template.dimension() == Some(dim))
            .map(|template| {
                dtw(
                    candidate.frames(),
                    template.frames(),
                    self.config.metric,
                    self.config.window,
                )
            })
            .filter(|score| score.is_finite())
            .reduce(f32::min)
    }
}

impl Default for SequenceMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

/// Computes the dynamic time warping distance between two sequences.
///
/// Allowed steps are `(i-1, j)`, `(i, j-1)` and `(i-1, j-1)`, each adding the distance between
/// frames `i` and `j`. The returned value is the cumulative cost of the optimal path divided by
/// its number of steps. Returns infinity if either sequence is empty.
pub fn dtw(a: &[FeatureVector], b: &[FeatureVector], metric: FrameMetric, window: Option<usize>) -> f32 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return f32::INFINITY;
    }
    let w = window.map_or(n.max(m), |w| w.max(n.abs_diff(m)));

    // Rolling rows of (cumulative cost, path steps).
    let unreachable = (f32::INFINITY, 0u32);
    let mut prev = vec![unreachable; m + 1];
    let mut curr = vec![unreachable; m + 1];
    prev[0] = (0.0, 0);

    for i in 1..=n {
        curr.fill(unreachable);
        let lo = i.saturating_sub(w).max(1);
        let hi = (i + w).min(m);
        for j in lo..=hi {
            let cost = metric.distance(a[i - 1].as_slice(), b[j - 1].as_slice());
            // Prefer the diagonal on ties: it yields the shortest path.
            let mut from = prev[j - 1];
            for cand in [prev[j], curr[j - 1]] {
                if cand.0 < from.0 {
                    from = cand;
                }
            }
            curr[j] = (from.0 + cost, from.1 + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let (total, steps) = prev[m];
    if steps == 0 {
        f32::INFINITY
    } else {
        total / steps as f32
    }
}
