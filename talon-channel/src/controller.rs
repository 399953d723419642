//! The `ChannelController` implementation: the bridge an `LbPolicy` uses to
//! create subchannels and publish pickers, backed by the process-wide
//! subchannel pool and the resolving load balancer's event loop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use talon_lb::{Address, ChannelController, LbState, Picker, SubchannelId};
use talon_resolver::Resolver;

use crate::connector::Http2Connector;
use crate::options::ChannelOptions;
use crate::pool::SubchannelPool;
use crate::subchannel::Subchannel;

/// Internal events the resolving load balancer's single-threaded run loop
/// reacts to — resolver output, subchannel transitions, and requests that
/// originate from outside that loop (a picker's first `exitIdle()` wakeup,
/// an external `resetBackoff()` call). `pub(crate)` since nothing outside
/// this crate constructs or inspects one directly.
pub(crate) enum LbEvent {
    ResolverResult(talon_resolver::ResolverResult),
    ResolverError(talon_wire::Status),
    SubchannelState(SubchannelId, talon_lb::SubchannelState),
    Work,
    ResolutionBackoffElapsed,
    ExitIdleRequested,
    ResetBackoffRequested,
}

/// A `Picker` that forwards every pick to the wrapped child picker, but also
/// fires an `exitIdle()` request back into the resolving load balancer the
/// first time it is consulted — per §4.8, the picker published while the
/// child is `IDLE` wakes the child on first use rather than leaving it idle
/// forever.
pub(crate) struct IdleWakingPicker {
    inner: Arc<dyn Picker>,
    event_tx: mpsc::UnboundedSender<LbEvent>,
    woken: std::sync::atomic::AtomicBool,
}

impl IdleWakingPicker {
    pub(crate) fn new(inner: Arc<dyn Picker>, event_tx: mpsc::UnboundedSender<LbEvent>) -> Self {
        IdleWakingPicker {
            inner,
            event_tx,
            woken: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Picker for IdleWakingPicker {
    fn pick(&self) -> talon_lb::PickResult {
        if !self.woken.swap(true, std::sync::atomic::Ordering::AcqRel) {
            let _ = self.event_tx.send(LbEvent::ExitIdleRequested);
        }
        self.inner.pick()
    }
}

/// Shared with the owning `Channel` so it can resolve a `SubchannelId` from
/// a pick into the live `Subchannel` it opens streams on — the resolving
/// load balancer's run loop is the only writer, `Channel`'s pick-queue is a
/// read-only reader, so a `parking_lot::Mutex` is enough (no contention
/// beyond the rare moment a new subchannel is created).
pub type SharedSubchannels = Arc<Mutex<HashMap<SubchannelId, Arc<Subchannel>>>>;

pub(crate) struct Controller<'a> {
    pub(crate) connector: &'a Arc<dyn Http2Connector>,
    pub(crate) options: &'a Arc<ChannelOptions>,
    pub(crate) subchannels: &'a SharedSubchannels,
    pub(crate) event_tx: &'a mpsc::UnboundedSender<LbEvent>,
    pub(crate) picker_tx: &'a watch::Sender<LbState>,
    pub(crate) resolver: &'a mut dyn Resolver,
}

impl ChannelController for Controller<'_> {
    fn new_subchannel(&mut self, address: &Address) -> SubchannelId {
        let subchannel = SubchannelPool::acquire(address, self.connector, self.options);
        let id = subchannel.id;
        self.subchannels.lock().entry(id).or_insert_with(|| {
            subchannel.ref_();
            spawn_state_forwarder(id, subchannel.clone(), self.event_tx.clone());
            subchannel
        });
        id
    }

    fn update_picker(&mut self, mut state: LbState) {
        if state.connectivity_state == talon_lb::ConnectivityState::Idle {
            state.picker = Arc::new(IdleWakingPicker::new(state.picker, self.event_tx.clone()));
        }
        let _ = self.picker_tx.send(state);
    }

    fn request_resolution(&mut self) {
        self.resolver.resolve_now();
    }
}

/// Subscribes to one subchannel's state updates for as long as it's tracked
/// by this resolving load balancer, forwarding every change into the event
/// loop. Exits once the subchannel reaches `Shutdown` or the event channel's
/// receiver is gone (the resolving load balancer itself shut down).
fn spawn_state_forwarder(id: SubchannelId, subchannel: Arc<Subchannel>, event_tx: mpsc::UnboundedSender<LbEvent>) {
    let mut states = subchannel.subscribe();
    tokio::spawn(async move {
        loop {
            let state = states.borrow().clone();
            let shutdown = state.connectivity_state == talon_lb::ConnectivityState::Shutdown;
            if event_tx.send(LbEvent::SubchannelState(id, state)).is_err() || shutdown {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    });
}
