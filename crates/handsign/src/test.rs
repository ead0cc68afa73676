//! Fixtures shared by unit tests.

use std::{fs, path::PathBuf};

use crate::feature::FeatureVector;
use crate::landmark::Landmarks;
use crate::sequence::GestureSequence;
use crate::{body, hand};

/// A plausible-looking, non-degenerate hand with the wrist at `offset`, scaled by `scale`.
pub fn hand_landmarks(offset: [f32; 3], scale: f32) -> Landmarks {
    Landmarks::from_positions((0..hand::NUM_LANDMARKS).map(|i| {
        let canonical = [
            (i % 5) as f32 * 0.25,
            (i / 5) as f32 * 0.5 + 0.1 * i as f32,
            0.01 * i as f32,
        ];
        [
            canonical[0] * scale + offset[0],
            canonical[1] * scale + offset[1],
            canonical[2] * scale + offset[2],
        ]
    }))
}

pub fn pose_landmarks() -> Landmarks {
    Landmarks::from_positions(
        (0..body::NUM_LANDMARKS).map(|i| [i as f32 * 0.1, (i % 3) as f32 * 0.2, 0.05]),
    )
}

pub fn sequence(frames: &[&[f32]]) -> GestureSequence {
    frames
        .iter()
        .map(|frame| FeatureVector::from(frame.to_vec()))
        .collect()
}

/// Returns an empty directory private to the calling test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("handsign-{}-{}", std::process::id(), name));
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A hand whose fingertips are displaced sideways by `bend`, leaving the palm untouched.
///
/// Varying `bend` over time produces gestures the feature extractor can tell apart, since the
/// palm landmarks used for normalization stay put.
pub fn posed_hand(bend: f32) -> Landmarks {
    let mut hand = hand_landmarks([0.2, 0.3, 0.0], 0.1);
    for (i, pos) in hand.positions_mut().iter_mut().enumerate() {
        if i > 0 && i % 4 == 0 {
            pos[0] += bend * 0.1;
        }
    }
    hand
}

/// Frames of a gesture where the left hand's fingertips follow `bends`.
pub fn gesture(bends: impl IntoIterator<Item = f32>) -> Vec<crate::landmark::LandmarkFrame> {
    bends
        .into_iter()
        .map(|bend| crate::landmark::LandmarkFrame::empty().with_left_hand(posed_hand(bend)))
        .collect()
}
