//! Per-frame feature extraction.
//!
//! A [`FeatureExtractor`] turns one [`LandmarkFrame`] into a [`FeatureVector`]: the concatenated,
//! normalized coordinates of every enabled body part. Absent parts contribute a block of zeros
//! instead of being left out, so every vector produced by one extractor has the same width.

use std::iter;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::landmark::{LandmarkFrame, Landmarks, Part};
use crate::timer::Timer;
use crate::{body, hand};

/// Reference lengths below this are treated as degenerate landmark data.
const MIN_REFERENCE_LENGTH: f32 = 1e-6;

/// The features of a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Box<[f32]>);

impl FeatureVector {
    pub fn new(values: impl Into<Box<[f32]>>) -> Self {
        Self(values.into())
    }

    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len].into_boxed_slice())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values.into_boxed_slice())
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Selects which body parts contribute to the features, and how they are normalized.
///
/// The reference library has to be extracted with the same configuration that is used for live
/// recognition, otherwise the vector widths won't match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    left_hand: bool,
    right_hand: bool,
    pose: bool,
    scale: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            left_hand: true,
            right_hand: true,
            pose: false,
            scale: true,
        }
    }
}

impl FeatureConfig {
    /// Sets whether left hand landmarks are included.
    #[inline]
    pub fn left_hand(self, enabled: bool) -> Self {
        Self {
            left_hand: enabled,
            ..self
        }
    }

    /// Sets whether right hand landmarks are included.
    #[inline]
    pub fn right_hand(self, enabled: bool) -> Self {
        Self {
            right_hand: enabled,
            ..self
        }
    }

    /// Sets whether body pose landmarks are included.
    #[inline]
    pub fn pose(self, enabled: bool) -> Self {
        Self {
            pose: enabled,
            ..self
        }
    }

    /// Sets whether each part is scaled by its reference length after being translated to its
    /// anchor.
    ///
    /// Scaling makes the features independent of the signer's distance from the camera.
    #[inline]
    pub fn scale(self, enabled: bool) -> Self {
        Self {
            scale: enabled,
            ..self
        }
    }

    /// The enabled parts, in the order their features are laid out.
    pub fn parts(&self) -> Vec<Part> {
        [
            (Part::LeftHand, self.left_hand),
            (Part::RightHand, self.right_hand),
            (Part::Pose, self.pose),
        ]
        .into_iter()
        .filter_map(|(part, enabled)| enabled.then_some(part))
        .collect()
    }
}

/// Converts landmark estimator results into [`FeatureVector`]s.
pub struct FeatureExtractor {
    config: FeatureConfig,
    parts: Vec<Part>,
    dimension: usize,
    t_extract: Timer,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let parts = config.parts();
        let dimension = parts.iter().map(|&part| part_width(part)).sum();
        Self {
            config,
            parts,
            dimension,
            t_extract: Timer::new("extract"),
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Returns the width of every [`FeatureVector`] produced by this extractor.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_extract].into_iter()
    }

    /// Computes the features of `frame`.
    ///
    /// Parts missing from the frame are zero-filled. Malformed part data (unexpected landmark
    /// count, non-finite coordinates, or a collapsed reference length) is treated the same as a
    /// missing part.
    pub fn extract(&self, frame: &LandmarkFrame) -> FeatureVector {
        self.t_extract.time(|| {
            let mut out = Vec::with_capacity(self.dimension);
            for &part in &self.parts {
                let width = part_width(part);
                let start = out.len();
                let present = match frame.part(part) {
                    Some(landmarks) => self.push_normalized(part, landmarks, &mut out),
                    None => false,
                };
                if !present {
                    out.truncate(start);
                    out.extend(iter::repeat(0.0).take(width));
                }
            }
            debug_assert_eq!(out.len(), self.dimension);
            FeatureVector::from(out)
        })
    }

    /// Appends the normalized coordinates of one part to `out`. Returns `false` if the data is
    /// unusable.
    fn push_normalized(&self, part: Part, landmarks: &Landmarks, out: &mut Vec<f32>) -> bool {
        let Some(expected) = part.landmark_count() else {
            return false;
        };
        if landmarks.len() != expected {
            log::trace!(
                "{:?}: expected {} landmarks, got {}; treating as absent",
                part,
                expected,
                landmarks.len(),
            );
            return false;
        }
        if !landmarks.is_finite() {
            log::trace!("{:?}: non-finite landmark coordinates; treating as absent", part);
            return false;
        }

        let point = |index: usize| Point3::from(landmarks.positions()[index]);
        let (origin, unit) = match part {
            Part::LeftHand | Part::RightHand => {
                let (a, b) = hand::SCALE_REFERENCE;
                (
                    point(hand::ANCHOR as usize),
                    nalgebra::distance(&point(a as usize), &point(b as usize)),
                )
            }
            Part::Pose => {
                let (l, r) = body::SHOULDERS;
                let (l, r) = (point(l as usize), point(r as usize));
                (nalgebra::center(&l, &r), nalgebra::distance(&l, &r))
            }
            Part::Face => return false,
        };

        let factor = if self.config.scale {
            if !(unit > MIN_REFERENCE_LENGTH) {
                log::trace!("{:?}: degenerate reference length {}", part, unit);
                return false;
            }
            1.0 / unit
        } else {
            1.0
        };

        for &pos in landmarks.positions() {
            let rel: Vector3<f32> = (Point3::from(pos) - origin) * factor;
            out.extend_from_slice(rel.as_slice());
        }
        true
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

fn part_width(part: Part) -> usize {
    part.landmark_count().unwrap_or(0) * 3
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::test::{hand_landmarks, pose_landmarks};

    #[test]
    fn dimension_is_fixed() {
        let extractor = FeatureExtractor::default();
        assert_eq!(extractor.dimension(), 2 * 21 * 3);

        let frames = [
            LandmarkFrame::empty(),
            LandmarkFrame::empty().with_left_hand(hand_landmarks([0.0; 3], 1.0)),
            LandmarkFrame::empty().with_right_hand(hand_landmarks([0.5, 0.5, 0.0], 0.2)),
            LandmarkFrame::empty()
                .with_left_hand(hand_landmarks([0.0; 3], 1.0))
                .with_right_hand(hand_landmarks([1.0; 3], 1.0))
                .with_pose(pose_landmarks()),
            LandmarkFrame::empty().with_right_hand(Landmarks::new(3)),
        ];
        for frame in &frames {
            assert_eq!(extractor.extract(frame).len(), extractor.dimension());
        }

        let with_pose = FeatureExtractor::new(FeatureConfig::default().pose(true));
        assert_eq!(with_pose.dimension(), (2 * 21 + 33) * 3);
        for frame in &frames {
            assert_eq!(with_pose.extract(frame).len(), with_pose.dimension());
        }
    }

    #[test]
    fn absent_parts_are_zero() {
        let extractor = FeatureExtractor::default();
        let frame = LandmarkFrame::empty().with_right_hand(hand_landmarks([0.3, 0.1, 0.0], 0.1));
        let features = extractor.extract(&frame);
        let (left, right) = features.as_slice().split_at(21 * 3);
        assert!(left.iter().all(|&v| v == 0.0));
        assert!(right.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn invariant_to_position_and_scale() {
        let extractor = FeatureExtractor::default();
        let near = LandmarkFrame::empty().with_left_hand(hand_landmarks([0.1, 0.2, 0.0], 0.3));
        let far = LandmarkFrame::empty().with_left_hand(hand_landmarks([0.7, -0.4, 0.5], 0.05));

        let a = extractor.extract(&near);
        let b = extractor.extract(&far);
        for (a, b) in a.as_slice().iter().zip(b.as_slice()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }

        // Anchor at the origin, reference landmark at unit distance.
        assert_eq!(&a.as_slice()[..3], &[0.0, 0.0, 0.0]);
        let mcp = hand::LandmarkIdx::MiddleFingerMcp as usize * 3;
        let r = &a.as_slice()[mcp..mcp + 3];
        assert_relative_eq!((r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn unscaled_keeps_translation_only() {
        let extractor = FeatureExtractor::new(FeatureConfig::default().scale(false));
        let frame = LandmarkFrame::empty().with_left_hand(hand_landmarks([5.0, 5.0, 5.0], 2.0));
        let reference = hand_landmarks([0.0; 3], 2.0);
        let features = extractor.extract(&frame);
        for (i, pos) in reference.positions().iter().enumerate() {
            for axis in 0..3 {
                assert_relative_eq!(features.as_slice()[i * 3 + axis], pos[axis], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn malformed_parts_are_absent() {
        let extractor = FeatureExtractor::default();

        let mut nan_hand = hand_landmarks([0.0; 3], 1.0);
        nan_hand.positions_mut()[4][1] = f32::NAN;
        let collapsed = Landmarks::new(21);

        for hand in [nan_hand, collapsed, Landmarks::new(20)] {
            let frame = LandmarkFrame::empty().with_left_hand(hand);
            let features = extractor.extract(&frame);
            assert!(features.as_slice().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn pose_is_anchored_between_shoulders() {
        let extractor = FeatureExtractor::new(
            FeatureConfig::default()
                .left_hand(false)
                .right_hand(false)
                .pose(true),
        );
        let features = extractor.extract(&LandmarkFrame::empty().with_pose(pose_landmarks()));
        let l = body::LandmarkIdx::LeftShoulder as usize * 3;
        let r = body::LandmarkIdx::RightShoulder as usize * 3;
        let v = features.as_slice();
        // Shoulders end up mirrored around the origin at half a unit each.
        for axis in 0..3 {
            assert_relative_eq!(v[l + axis], -v[r + axis], epsilon = 1e-5);
        }
        let half = (v[l] * v[l] + v[l + 1] * v[l + 1] + v[l + 2] * v[l + 2]).sqrt();
        assert_relative_eq!(half, 0.5, epsilon = 1e-5);
    }
}
