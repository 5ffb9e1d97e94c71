//! # Shared Controls
//!
//! The commanded stick positions and the published session flags, shared
//! between the calibration state machine (writer) and the output scheduler
//! (reader). Readers always take a snapshot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::calibration::Mode;

/// Commanded stick positions in `[-1, 1]`, positive Y up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StickPositions {
    pub lx: f32,
    pub ly: f32,
    pub rx: f32,
    pub ry: f32,
}

/// Session flags the scheduler acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub mode: Mode,
    /// A session is live.
    pub armed: bool,
    /// A timed rotation is under way.
    pub in_trial: bool,
}

#[derive(Debug, Default)]
struct ControlsInner {
    sticks: StickPositions,
    status: SessionStatus,
}

/// Mutex-guarded commanded sticks and status.
#[derive(Debug, Default)]
pub struct SharedControls {
    inner: Mutex<ControlsInner>,
}

impl SharedControls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn sticks(&self) -> StickPositions {
        self.lock().sticks
    }

    pub fn set_left(&self, x: f32, y: f32) {
        let mut inner = self.lock();
        inner.sticks.lx = x;
        inner.sticks.ly = y;
    }

    pub fn set_right(&self, x: f32, y: f32) {
        let mut inner = self.lock();
        inner.sticks.rx = x;
        inner.sticks.ry = y;
    }

    pub fn center_right(&self) {
        self.set_right(0.0, 0.0);
    }

    pub fn center_all(&self) {
        self.lock().sticks = StickPositions::default();
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn publish(&self, status: SessionStatus) {
        self.lock().status = status;
    }
}
