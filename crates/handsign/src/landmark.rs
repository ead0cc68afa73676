//! Landmark estimator output.
//!
//! The pose/hand landmark estimator itself is an external collaborator (see
//! [`PoseEstimator`][crate::capture::PoseEstimator]). This module defines the structured result it
//! has to produce for every frame.

use serde::{Deserialize, Serialize};

use crate::{body, hand};

pub type Position = [f32; 3];

/// An ordered, fixed-size collection of 3D landmark positions belonging to one body part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Landmarks {
    positions: Box<[Position]>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0]; len].into_boxed_slice(),
        }
    }

    pub fn from_positions<I: IntoIterator<Item = Position>>(positions: I) -> Self {
        Self {
            positions: positions.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Position> {
        self.positions.get(index).copied()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    /// Returns whether every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.positions.iter().flatten().all(|c| c.is_finite())
    }
}

/// Tracked body parts of a [`LandmarkFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    LeftHand,
    RightHand,
    Pose,
    Face,
}

impl Part {
    /// Number of landmarks the estimator reports for this part, if the part has a fixed layout.
    ///
    /// The face mesh layout depends on the estimator, so it has no fixed size and is never used
    /// for features.
    pub fn landmark_count(self) -> Option<usize> {
        match self {
            Part::LeftHand | Part::RightHand => Some(hand::NUM_LANDMARKS),
            Part::Pose => Some(body::NUM_LANDMARKS),
            Part::Face => None,
        }
    }
}

/// Estimator result for a single video frame.
///
/// Every part is optional; `None` means the estimator did not find the part in the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_hand: Option<Landmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_hand: Option<Landmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<Landmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<Landmarks>,
}

impl LandmarkFrame {
    /// A frame in which nothing was detected.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_left_hand(self, landmarks: Landmarks) -> Self {
        Self {
            left_hand: Some(landmarks),
            ..self
        }
    }

    pub fn with_right_hand(self, landmarks: Landmarks) -> Self {
        Self {
            right_hand: Some(landmarks),
            ..self
        }
    }

    pub fn with_pose(self, landmarks: Landmarks) -> Self {
        Self {
            pose: Some(landmarks),
            ..self
        }
    }

    pub fn part(&self, part: Part) -> Option<&Landmarks> {
        match part {
            Part::LeftHand => self.left_hand.as_ref(),
            Part::RightHand => self.right_hand.as_ref(),
            Part::Pose => self.pose.as_ref(),
            Part::Face => self.face.as_ref(),
        }
    }

    pub fn is_present(&self, part: Part) -> bool {
        self.part(part).is_some()
    }

    /// Returns whether at least one hand was detected.
    pub fn has_hands(&self) -> bool {
        self.left_hand.is_some() || self.right_hand.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_parts_are_omitted_from_json() {
        let frame = LandmarkFrame::empty().with_left_hand(Landmarks::new(2));
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"left_hand":[[0.0,0.0,0.0],[0.0,0.0,0.0]]}"#);

        let back: LandmarkFrame = serde_json::from_str(&json).unwrap();
        assert!(back.is_present(Part::LeftHand));
        assert!(!back.is_present(Part::RightHand));
        assert!(back.has_hands());
    }

    #[test]
    fn finiteness() {
        let mut lms = Landmarks::new(3);
        assert!(lms.is_finite());
        lms.positions_mut()[1][2] = f32::NAN;
        assert!(!lms.is_finite());
    }
}
