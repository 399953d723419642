//! Subchannel identity and the state snapshots an LB policy receives about
//! it. The actual connected transport lives in `talon-channel`; this crate
//! only needs a stable handle and a state description to build pickers.

use std::sync::atomic::{AtomicU64, Ordering};

use talon_wire::Status;

use crate::connectivity::ConnectivityState;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque, cheaply-cloned, cheaply-compared handle to one subchannel.
/// LB policies key pickers off this, never off the address directly, since
/// two subchannels may share an address if one is being torn down while a
/// replacement spins up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubchannelId(u64);

impl SubchannelId {
    pub fn next() -> Self {
        SubchannelId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A snapshot of one subchannel's state, as reported to an `LbPolicy`.
#[derive(Debug, Clone)]
pub struct SubchannelState {
    pub connectivity_state: ConnectivityState,
    /// Set only when `connectivity_state` is `TransientFailure`.
    pub last_connection_error: Option<Status>,
}

impl SubchannelState {
    pub fn idle() -> Self {
        SubchannelState {
            connectivity_state: ConnectivityState::Idle,
            last_connection_error: None,
        }
    }

    pub fn ready() -> Self {
        SubchannelState {
            connectivity_state: ConnectivityState::Ready,
            last_connection_error: None,
        }
    }

    pub fn transient_failure(error: Status) -> Self {
        SubchannelState {
            connectivity_state: ConnectivityState::TransientFailure,
            last_connection_error: Some(error),
        }
    }
}
