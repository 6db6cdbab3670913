//! # frame
//!
//! The per-frame callback contract. The drive loop never reschedules itself
//! implicitly: each tick asks the host for exactly one more frame, and
//! stopping means cancelling the outstanding request by id. A cancelled id
//! never fires, so no tick can reach a machine that has been torn down.
use std::time::{Duration, Instant};

pub const DEFAULT_FRAME_RATE: f64 = 60.0;

/// identifies one requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

pub trait FrameHost {
    /// ask for one future callback
    fn request_frame(&mut self) -> FrameId;

    /// withdraw a request; true if it had not fired yet
    fn cancel_frame(&mut self, id: FrameId) -> bool;
}

/// Native frame pacing: one frame every `1 / frame_rate` seconds, waited out
/// with spin_sleep, timestamps in milliseconds since creation.
pub struct PacedFrames {
    period: Duration,
    origin: Instant,
    deadline: Instant,
    next_id: u64,
    pending: Option<FrameId>,
}

impl PacedFrames {
    pub fn new(frame_rate: f64) -> Self {
        let now = Instant::now();
        let period = Duration::from_secs_f64(1.0 / frame_rate.max(1.0));
        PacedFrames {
            period,
            origin: now,
            deadline: now + period,
            next_id: 0,
            pending: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// monotonic milliseconds since this pacer was created
    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    /// Sleep until the next frame boundary, then hand back the pending
    /// request, if there still is one, with the frame's timestamp. The
    /// request is consumed: the callback has to ask again.
    pub fn wait_next(&mut self) -> Option<(FrameId, f64)> {
        let now = Instant::now();
        if self.deadline > now {
            spin_sleep::sleep(self.deadline - now);
        }
        // don't try to catch up after a stall, just skip the missed frames
        self.deadline = (self.deadline + self.period).max(Instant::now());
        let id = self.pending.take()?;
        Some((id, self.now_ms()))
    }
}

impl FrameHost for PacedFrames {
    fn request_frame(&mut self) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        if let Some(old) = self.pending.replace(id) {
            tracing::warn!(?old, ?id, "frame requested while another was pending");
        }
        id
    }

    fn cancel_frame(&mut self, id: FrameId) -> bool {
        if self.pending == Some(id) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

/// Frame host driven by hand; records what was asked of it.
#[derive(Debug, Default)]
pub struct ManualFrames {
    next_id: u64,
    pending: Vec<FrameId>,
    pub requested: usize,
    pub cancelled: usize,
}

impl ManualFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// requests not yet fired or cancelled
    pub fn pending(&self) -> &[FrameId] {
        &self.pending
    }

    /// fire the oldest pending request
    pub fn fire(&mut self) -> Option<FrameId> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }
}

impl FrameHost for ManualFrames {
    fn request_frame(&mut self) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.requested += 1;
        self.pending.push(id);
        id
    }

    fn cancel_frame(&mut self, id: FrameId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| *p != id);
        let removed = self.pending.len() != before;
        if removed {
            self.cancelled += 1;
        }
        removed
    }
}
