//! Suppression of repeated detections.

use std::time::{Duration, Instant};

use crate::matcher::Label;

/// Default minimum time between two dispatches of the same label.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1500);

/// Decides whether a detected label should be dispatched to listeners.
///
/// A label is dispatched unless it is equal to the last dispatched label *and* less than
/// `min_interval` has passed since that dispatch. A different label is always dispatched.
#[derive(Debug, Clone)]
pub struct Debouncer {
    min_interval: Duration,
    last: Option<(Label, Instant)>,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Offers a newly detected `label` observed at `now`.
    ///
    /// Returns `true` if it should be dispatched, in which case it becomes the new reference for
    /// suppression.
    pub fn offer(&mut self, label: &Label, now: Instant) -> bool {
        if let Some((last, at)) = &self.last {
            if last == label && now.saturating_duration_since(*at) < self.min_interval {
                log::trace!("suppressing repeated detection '{}'", label);
                return false;
            }
        }

        self.last = Some((label.clone(), now));
        true
    }

    /// Forgets the last dispatched label.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(label: &str) -> Label {
        Label::Sign(label.into())
    }

    #[test]
    fn suppresses_repeats() {
        let mut debouncer = Debouncer::default();
        let t0 = Instant::now();
        assert!(debouncer.offer(&sign("A"), t0));
        assert!(!debouncer.offer(&sign("A"), t0 + Duration::from_millis(500)));
        assert!(!debouncer.offer(&sign("A"), t0 + Duration::from_millis(1400)));
    }

    #[test]
    fn different_labels_always_pass() {
        let mut debouncer = Debouncer::default();
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let dispatched = [
            debouncer.offer(&sign("A"), t0),
            debouncer.offer(&sign("B"), t0 + ms(100)),
            debouncer.offer(&sign("A"), t0 + ms(200)),
            debouncer.offer(&Label::Unknown, t0 + ms(300)),
            debouncer.offer(&Label::Unknown, t0 + ms(400)),
        ];
        assert_eq!(dispatched, [true, true, true, true, false]);
    }

    #[test]
    fn repeats_pass_after_interval() {
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));
        let t0 = Instant::now();
        assert!(debouncer.offer(&sign("A"), t0));
        assert!(debouncer.offer(&sign("A"), t0 + Duration::from_millis(1600)));
        // The interval is measured from the last dispatch, not the last offer.
        assert!(!debouncer.offer(&sign("A"), t0 + Duration::from_millis(2000)));

        debouncer.reset();
        assert!(debouncer.offer(&sign("A"), t0 + Duration::from_millis(2100)));
    }
}
