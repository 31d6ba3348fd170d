use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one recording attempt.
///
/// Transitions: Idle -> Recording (start), Recording -> Processing (stop,
/// exactly once per attempt), Processing -> Done (finalize success),
/// Processing -> Idle / Done -> Idle (reset for a fresh attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Recording,
    Processing,
    Done,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CaptureState::Recording,
            2 => CaptureState::Processing,
            3 => CaptureState::Done,
            _ => CaptureState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Idle => 0,
            CaptureState::Recording => 1,
            CaptureState::Processing => 2,
            CaptureState::Done => 3,
        }
    }
}

/// Atomic cell holding the capture state.
///
/// The compare-and-swap transition is what makes stop idempotent: of all
/// concurrent exits (manual stop, duration guard, error) exactly one wins
/// the Recording -> Processing edge.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: CaptureState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Attempt the `from -> to` transition; true if this caller won it.
    pub fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Why a recording stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// User pressed stop
    Manual,
    /// The session duration guard fired
    MaxDuration,
    /// An unrecoverable capture error
    Error,
}
