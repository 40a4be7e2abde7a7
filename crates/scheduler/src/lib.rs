use std::time::{Duration, Instant};

use stackconfig::StackConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchedulerError {
    #[error("frame rate must be a finite, non-negative number (got {0})")]
    InvalidRate(f32),
}

/// Timing of an accepted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// Wall-clock time since the first accepted frame.
    pub elapsed: Duration,
    /// Time since the previous accepted frame.
    pub delta: Duration,
    pub frame: u64,
}

impl FrameTick {
    pub fn seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDecision {
    Render(FrameTick),
    Skip { remaining: Duration },
}

impl FrameDecision {
    pub fn is_render(&self) -> bool {
        matches!(self, FrameDecision::Render(_))
    }
}

/// Drops display callbacks that arrive sooner than one frame interval after
/// the last accepted frame.
///
/// The interval is measured from the timestamp of the last *accepted*
/// callback, so a callback that arrives late does not shorten the next
/// interval. Animation time is always wall-clock, never a frame count.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Option<Duration>,
    origin: Option<Instant>,
    last_accepted: Option<Instant>,
    frames: u64,
}

impl FrameScheduler {
    /// `None` or `Some(0.0)` disables throttling.
    pub fn new(fps: Option<f32>) -> Result<Self, SchedulerError> {
        let interval = match fps {
            None => None,
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(SchedulerError::InvalidRate(rate))
            }
            Some(rate) if rate == 0.0 => None,
            Some(rate) => Some(Duration::from_secs_f64(1.0 / f64::from(rate))),
        };
        Ok(Self::with_interval(interval))
    }

    pub fn with_interval(interval: Option<Duration>) -> Self {
        Self {
            interval,
            origin: None,
            last_accepted: None,
            frames: 0,
        }
    }

    pub fn from_config(config: &StackConfig) -> Result<Self, SchedulerError> {
        Self::new(Some(config.frame.fps))
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Decide whether the callback at `now` renders. Accepting a frame
    /// records `now` as the new reference point.
    pub fn poll(&mut self, now: Instant) -> FrameDecision {
        if let (Some(interval), Some(last)) = (self.interval, self.last_accepted) {
            let since = now.saturating_duration_since(last);
            if since < interval {
                return FrameDecision::Skip {
                    remaining: interval - since,
                };
            }
        }

        let origin = *self.origin.get_or_insert(now);
        let delta = self
            .last_accepted
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_accepted = Some(now);
        let tick = FrameTick {
            elapsed: now.saturating_duration_since(origin),
            delta,
            frame: self.frames,
        };
        self.frames += 1;
        FrameDecision::Render(tick)
    }

    /// Earliest instant at which `poll` would accept a frame.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.interval, self.last_accepted) {
            (Some(interval), Some(last)) => Some(last + interval),
            _ => None,
        }
    }

    /// Restart the animation clock; the next poll is accepted at time zero.
    pub fn reset(&mut self) {
        self.origin = None;
        self.last_accepted = None;
        self.frames = 0;
    }
}

/// Rolling measured frame rate, reported once per window.
#[derive(Debug, Clone)]
pub struct FramePacing {
    window: Duration,
    window_start: Option<Instant>,
    frames_in_window: u32,
    last_rate: Option<f32>,
}

impl Default for FramePacing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FramePacing {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames_in_window: 0,
            last_rate: None,
        }
    }

    /// Count a rendered frame. Returns the measured rate when a window closes.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frames_in_window += 1;
        let span = now.saturating_duration_since(start);
        if span < self.window {
            return None;
        }
        let rate = self.frames_in_window as f32 / span.as_secs_f32();
        tracing::debug!(fps = rate, frames = self.frames_in_window, "frame pacing");
        self.window_start = Some(now);
        self.frames_in_window = 0;
        self.last_rate = Some(rate);
        Some(rate)
    }

    pub fn last_rate(&self) -> Option<f32> {
        self.last_rate
    }
}
