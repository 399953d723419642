//! Pickers: the per-RPC decision of which subchannel to use, produced fresh
//! each time an `LbPolicy` publishes a new `LbState`.

use std::sync::Arc;

use talon_wire::{Metadata, Status};

use crate::connectivity::ConnectivityState;
use crate::subchannel::SubchannelId;

/// The outcome of one `Picker::pick` call.
pub enum PickResult {
    /// Use this subchannel; `extra_metadata` is merged into the call's
    /// outgoing metadata before it is sent (used by, e.g., a weighted
    /// policy tagging the chosen backend).
    Pick(Pick),
    /// No decision yet; the channel queues the call and retries against the
    /// next published picker.
    Queue,
    /// Fail the call with `UNAVAILABLE`, unless the call is `waitForReady`,
    /// in which case it stays queued instead of failing.
    Fail(Status),
    /// Fail the call immediately, `waitForReady` or not. The channel coerces
    /// the code to `INTERNAL` if it isn't a code control planes are allowed
    /// to produce.
    Drop(Status),
}

pub struct Pick {
    pub subchannel: SubchannelId,
    pub extra_metadata: Metadata,
}

impl Pick {
    pub fn new(subchannel: SubchannelId) -> Self {
        Pick {
            subchannel,
            extra_metadata: Metadata::new(),
        }
    }
}

/// A snapshot of an `LbPolicy`'s output: the aggregate connectivity state to
/// surface to `getConnectivityState`/`watchConnectivityState`, plus the
/// picker to use for new RPCs.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

impl LbState {
    /// The generic starting point for any policy: connecting, queue
    /// everything until the first real update arrives.
    pub fn initial() -> Self {
        LbState {
            connectivity_state: ConnectivityState::Connecting,
            picker: Arc::new(QueuingPicker),
        }
    }

    pub fn transient_failure(status: Status) -> Self {
        LbState {
            connectivity_state: ConnectivityState::TransientFailure,
            picker: Arc::new(FailingPicker(status)),
        }
    }
}

/// Picks must not block; if deciding requires asynchronous work (e.g.
/// waiting on a connection attempt) the policy should be `Connecting` and
/// hand out a `QueuingPicker` until it has something concrete to offer.
pub trait Picker: Send + Sync {
    fn pick(&self) -> PickResult;
}

/// Always queues. Used while a policy has no ready subchannel yet.
pub struct QueuingPicker;

impl Picker for QueuingPicker {
    fn pick(&self) -> PickResult {
        PickResult::Queue
    }
}

/// Always fails with a fixed status (respecting `waitForReady` via `Fail`,
/// not `Drop`). Used for `TransientFailure` aggregate state.
pub struct FailingPicker(pub Status);

impl Picker for FailingPicker {
    fn pick(&self) -> PickResult {
        PickResult::Fail(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queuing_picker_always_queues() {
        assert!(matches!(QueuingPicker.pick(), PickResult::Queue));
    }

    #[test]
    fn failing_picker_carries_status() {
        let picker = FailingPicker(talon_wire::Status::new(
            talon_wire::Code::Unavailable,
            "no backends",
        ));
        match picker.pick() {
            PickResult::Fail(status) => assert_eq!(status.code, talon_wire::Code::Unavailable),
            _ => panic!("expected Fail"),
        }
    }
}
