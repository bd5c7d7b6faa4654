//! Decides whether the presentation layer should keep the transcript pinned
//! to the newest content.
//!
//! The policy never touches conversation state. It is fed scroll positions
//! as the viewer moves and content-change notices as the transcript grows,
//! and answers whether a scroll-to-bottom should be issued.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

/// Distance from the bottom, in pixels (or rows), treated as "at the bottom".
pub const DEFAULT_THRESHOLD: f64 = 50.0;

/// How often [`ScrollTicker`] polls [`AutoFollow::take_scroll_request`].
pub const SCROLL_TICK: Duration = Duration::from_millis(100);

/// Inputs to a single auto-follow decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSample {
    pub current_offset: f64,
    pub max_offset: f64,
    pub last_offset: f64,
    pub threshold: f64,
}

/// Pure decision rule: scrolling up to more than `threshold` away from the
/// bottom disengages; coming back within `threshold` re-engages; anything
/// else keeps the previous decision.
pub fn should_follow(sample: ScrollSample, currently_following: bool) -> bool {
    let ScrollSample {
        current_offset,
        max_offset,
        last_offset,
        threshold,
    } = sample;

    if current_offset < last_offset && current_offset < max_offset - threshold {
        false
    } else if max_offset - current_offset < threshold {
        true
    } else {
        currently_following
    }
}

#[derive(Debug, Clone)]
pub struct AutoFollow {
    threshold: f64,
    last_offset: f64,
    following: bool,
    pending_scroll: bool,
}

impl Default for AutoFollow {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl AutoFollow {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.0),
            last_offset: 0.0,
            following: true,
            pending_scroll: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    /// Records a scroll position change and returns the updated decision.
    pub fn observe(&mut self, current_offset: f64, max_offset: f64) -> bool {
        self.following = should_follow(
            ScrollSample {
                current_offset,
                max_offset,
                last_offset: self.last_offset,
                threshold: self.threshold,
            },
            self.following,
        );
        self.last_offset = current_offset;
        self.following
    }

    /// Notes that the transcript grew or a message changed.
    pub fn note_content_changed(&mut self) {
        self.pending_scroll = true;
    }

    /// Returns `true` at most once per batch of content changes, and only
    /// while following. A request held back while the viewer is scrolled
    /// away is delivered once they return to the bottom.
    pub fn take_scroll_request(&mut self) -> bool {
        if self.pending_scroll && self.following {
            self.pending_scroll = false;
            return true;
        }
        false
    }
}

/// Paces scroll requests to at most one per [`SCROLL_TICK`], however
/// often content changes in between.
pub struct ScrollTicker {
    interval: Interval,
}

impl Default for ScrollTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollTicker {
    /// Must be called inside a tokio runtime. The first tick fires at once.
    pub fn new() -> Self {
        let mut interval = tokio::time::interval(SCROLL_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Waits for the next tick and reports whether the host should scroll
    /// to the bottom now.
    pub async fn tick(&mut self, follow: &mut AutoFollow) -> bool {
        self.interval.tick().await;
        follow.take_scroll_request()
    }
}
