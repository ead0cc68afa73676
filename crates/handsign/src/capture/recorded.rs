//! Landmark streams recorded to disk.
//!
//! A recording is a JSON Lines file with one [`LandmarkFrame`] per line. Blank lines are skipped.
//! Since the estimator already ran when the stream was recorded, [`Passthrough`] is used in its
//! place when replaying.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::Context;

use crate::landmark::LandmarkFrame;

use super::{PoseEstimator, VideoSource};

/// A [`VideoSource`] replaying a recorded landmark stream.
pub struct RecordedLandmarks<R = BufReader<File>> {
    reader: R,
    line: String,
    line_number: usize,
}

impl RecordedLandmarks {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> RecordedLandmarks<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> VideoSource for RecordedLandmarks<R> {
    type Frame = LandmarkFrame;

    fn read(&mut self) -> anyhow::Result<Option<LandmarkFrame>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let frame = serde_json::from_str(line)
                .with_context(|| format!("invalid landmark frame on line {}", self.line_number))?;
            return Ok(Some(frame));
        }
    }
}

/// A [`PoseEstimator`] for sources that already deliver landmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl PoseEstimator for Passthrough {
    type Frame = LandmarkFrame;

    fn estimate(&mut self, frame: &LandmarkFrame) -> anyhow::Result<LandmarkFrame> {
        Ok(frame.clone())
    }
}

/// Reads a whole recorded landmark stream into memory.
pub fn read_clip<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<LandmarkFrame>> {
    let path = path.as_ref();
    let mut source = RecordedLandmarks::open(path)?;
    let mut frames = Vec::new();
    while let Some(frame) = source
        .read()
        .with_context(|| format!("failed to read '{}'", path.display()))?
    {
        frames.push(frame);
    }
    Ok(frames)
}
