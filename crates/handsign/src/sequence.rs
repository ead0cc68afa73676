//! Gesture sequences.
//!
//! While a gesture is being recorded, frames are accumulated in an append-only
//! [`RecordingBuffer`]. Finishing the buffer yields a [`GestureSequence`], which cannot be
//! modified anymore.

use serde::{Deserialize, Serialize};

use crate::feature::FeatureVector;

/// An ordered list of per-frame features making up one gesture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GestureSequence {
    frames: Vec<FeatureVector>,
}

impl GestureSequence {
    pub fn new(frames: Vec<FeatureVector>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FeatureVector] {
        &self.frames
    }

    /// Returns the width of the first frame's features, or `None` if the sequence is empty.
    pub fn dimension(&self) -> Option<usize> {
        self.frames.first().map(FeatureVector::len)
    }

    /// Returns whether all frames have the same, nonzero width.
    pub fn is_uniform(&self) -> bool {
        match self.dimension() {
            Some(0) | None => false,
            Some(dim) => self.frames.iter().all(|f| f.len() == dim),
        }
    }
}

impl FromIterator<FeatureVector> for GestureSequence {
    fn from_iter<T: IntoIterator<Item = FeatureVector>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// The append-only sequence under construction while a gesture is recorded.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    frames: Vec<FeatureVector>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    /// Appends the features of the next frame.
    pub fn push(&mut self, features: FeatureVector) {
        self.frames.push(features);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Closes the buffer, returning the recorded sequence.
    pub fn finish(self) -> GestureSequence {
        GestureSequence::new(self.frames)
    }
}
