//! Frame pacing state: playback, the shader clock and the redraw decision.
//!
//! The scheduler never draws on its own. [`crate::ShaderCanvas::tick`] asks it
//! whether a frame is due and reports back once one was drawn, so the same
//! logic serves a windowed event loop, a fixed-rate thread or a test that
//! feeds hand-picked instants.

use std::time::{Duration, Instant};

use crate::target::SurfaceSize;

/// Whether passive, clock-driven redraws happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Running,
    Paused,
}

/// Shader clock. Reset only by an explicit playback reset; pausing does not
/// stop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    load: Instant,
    previous: Instant,
    delta: Duration,
}

impl Clock {
    /// Creates a clock whose origin is `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            load: now,
            previous: now,
            delta: Duration::ZERO,
        }
    }

    /// Moves both the origin and the previous frame to `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    /// Records a drawn frame at `now` and returns `(elapsed, delta)`.
    ///
    /// Instants earlier than the last frame are clamped so the clock never
    /// runs backwards.
    pub fn advance(&mut self, now: Instant) -> (Duration, Duration) {
        let now = now.max(self.previous);
        self.delta = now - self.previous;
        self.previous = now;
        (now - self.load, self.delta)
    }

    /// Time between the origin and the last drawn frame.
    pub fn elapsed(&self) -> Duration {
        self.previous - self.load
    }

    /// Time between the last two drawn frames.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn load(&self) -> Instant {
        self.load
    }
}

/// Playback state, the redraw flag and the liveness flag of one runtime.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    state: PlaybackState,
    clock: Clock,
    force_redraw: bool,
    alive: bool,
    last_size: Option<SurfaceSize>,
    frames: u64,
}

impl RenderScheduler {
    /// Creates a running scheduler with its clock anchored at `now`. The
    /// first tick always draws.
    pub fn new(now: Instant) -> Self {
        Self {
            state: PlaybackState::Running,
            clock: Clock::new(now),
            force_redraw: true,
            alive: true,
            last_size: None,
            frames: 0,
        }
    }

    pub fn play(&mut self) {
        self.state = PlaybackState::Running;
    }

    pub fn pause(&mut self) {
        self.state = PlaybackState::Paused;
    }

    /// Flips between running and paused, returning the new state.
    pub fn toggle(&mut self) -> PlaybackState {
        self.state = match self.state {
            PlaybackState::Running => PlaybackState::Paused,
            PlaybackState::Paused => PlaybackState::Running,
        };
        self.state
    }

    /// Restarts the clock at `now` without touching the playback state.
    pub fn reset_playback(&mut self, now: Instant) {
        self.clock.reset(now);
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Makes the next tick draw even when paused or hidden.
    pub fn request_redraw(&mut self) {
        self.force_redraw = true;
    }

    pub fn redraw_requested(&self) -> bool {
        self.force_redraw
    }

    /// Forced redraws bypass both pause and visibility; passive redraws need
    /// a visible target and a running clock.
    pub fn should_draw(&self, visible: bool) -> bool {
        self.alive
            && (self.force_redraw || (visible && self.state == PlaybackState::Running))
    }

    /// Advances the clock for a frame about to be drawn at `now`.
    pub fn begin_frame(&mut self, now: Instant) -> (Duration, Duration) {
        self.clock.advance(now)
    }

    /// Clears the redraw flag after a successful draw and returns the new
    /// frame count.
    pub fn mark_drawn(&mut self) -> u64 {
        self.force_redraw = false;
        self.frames += 1;
        self.frames
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Records `size` and returns `true` when it differs from the last one
    /// seen. A change also requests a redraw.
    pub fn check_resize(&mut self, size: SurfaceSize) -> bool {
        if self.last_size == Some(size) {
            return false;
        }
        self.last_size = Some(size);
        self.force_redraw = true;
        true
    }

    pub fn last_size(&self) -> Option<SurfaceSize> {
        self.last_size
    }

    /// Stops all future ticks.
    pub fn destroy(&mut self) {
        self.alive = false;
        self.force_redraw = false;
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Supplies the instant of the next tick, or `None` to stop the loop.
pub trait TickSource {
    fn next_tick(&mut self) -> Option<Instant>;
}

/// Sleeps so ticks arrive at a fixed rate, optionally for a bounded number
/// of ticks.
#[derive(Debug, Clone)]
pub struct IntervalTicker {
    interval: Duration,
    next: Option<Instant>,
    remaining: Option<u64>,
}

impl IntervalTicker {
    /// Ticks `fps` times per second. Non-positive rates fall back to 60.
    pub fn new(fps: f32) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            interval: Duration::from_secs_f32(1.0 / fps),
            next: None,
            remaining: None,
        }
    }

    /// Stops after `count` ticks.
    pub fn limit(mut self, count: u64) -> Self {
        self.remaining = Some(count);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl TickSource for IntervalTicker {
    fn next_tick(&mut self) -> Option<Instant> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let now = Instant::now();
        let due = match self.next {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                due
            }
            _ => now,
        };
        self.next = Some(due + self.interval);
        Some(due)
    }
}

/// Replays a fixed sequence of instants without sleeping.
#[derive(Debug, Clone)]
pub struct ManualTicks<I> {
    ticks: I,
}

impl<I: Iterator<Item = Instant>> ManualTicks<I> {
    pub fn new(ticks: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            ticks: ticks.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Instant>> TickSource for ManualTicks<I> {
    fn next_tick(&mut self) -> Option<Instant> {
        self.ticks.next()
    }
}
