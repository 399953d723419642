//! `Channel` (§4.9): the public entry point. Owns a target URI, channel
//! options, a filter stack shared by every call, and the resolving load
//! balancer whose published picker it consults for each pick.
//!
//! There is no central queue of waiting calls. Each `create_call` instead
//! awaits the load balancer's `watch::Receiver<LbState>` directly and
//! re-picks on every change — equivalent to "enqueue on QUEUE, drain on
//! publish" since `watch` already broadcasts the latest value to every
//! clone, but without a data structure that would need its own locking.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use talon_filters::FilterStack;
use talon_lb::{ConnectivityState, LbState, PickResult};
use talon_resolver::Target;
use talon_session::client::{CallHandle, ClientCallListener, Http2CallStream};
use talon_wire::{Code, Metadata, Status};

use crate::connector::Http2Connector;
use crate::credentials::CallCredentials;
use crate::options::ChannelOptions;
use crate::resolving_lb::{self, ResolvingLbHandle};
use crate::subchannel::Subchannel;

/// A channel to one logical destination. Cheap to clone; clones share the
/// same resolving load balancer, subchannel pool entries, and picker.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    target: Target,
    options: Arc<ChannelOptions>,
    filter_stack: FilterStack,
    lb: ResolvingLbHandle,
}

impl Channel {
    /// Parses `target_uri`, looks up its resolver, and starts the resolving
    /// load balancer. Fails only if no resolver is registered for the
    /// target's scheme, or the URI itself is malformed.
    pub fn new(
        target_uri: &str,
        connector: Arc<dyn Http2Connector>,
        options: ChannelOptions,
        filter_stack: FilterStack,
    ) -> Result<Channel, Status> {
        let target = Target::parse(target_uri)
            .map_err(|error| Status::new(Code::InvalidArgument, error.to_string()))?;
        let options = Arc::new(options);
        let lb = resolving_lb::spawn(&target, connector, options.clone())?;
        Ok(Channel {
            inner: Arc::new(Inner {
                target,
                options,
                filter_stack,
                lb,
            }),
        })
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// The aggregate connectivity state last published by the load
    /// balancer. `try_to_connect` consults the current picker once, which is
    /// enough to trip `IdleWakingPicker`'s first-pick `exitIdle()` wakeup
    /// when the channel is otherwise sitting `Idle`.
    pub fn connectivity_state(&self, try_to_connect: bool) -> ConnectivityState {
        let state = self.inner.lb.lb_state.borrow().clone();
        if try_to_connect && state.connectivity_state == ConnectivityState::Idle {
            let _ = state.picker.pick();
        }
        state.connectivity_state
    }

    /// Resolves with the first connectivity state different from `current`,
    /// or `None` if `deadline` elapses first.
    pub async fn watch_connectivity_state(
        &self,
        current: ConnectivityState,
        deadline: Duration,
    ) -> Option<ConnectivityState> {
        let mut rx = self.inner.lb.lb_state.clone();
        let wait = async {
            loop {
                let observed = rx.borrow().connectivity_state;
                if observed != current {
                    return observed;
                }
                if rx.changed().await.is_err() {
                    return rx.borrow().connectivity_state;
                }
            }
        };
        tokio::time::timeout(deadline, wait).await.ok()
    }

    /// Resets every subchannel's reconnect backoff to its initial delay.
    pub fn reset_connection_backoff(&self) {
        self.inner.lb.reset_backoff();
    }

    /// §4.4's call-creation sequence: pick a subchannel (queueing/retrying
    /// per the picker's verdict), acquire call credentials against the
    /// computed service URL, inject `grpc-timeout`, and open the transport
    /// stream. The returned handle's listener always receives exactly one
    /// terminal status, whether the call ever reached a transport or not.
    #[tracing::instrument(skip(self, credentials, listener), fields(method = %method.as_ref()))]
    pub async fn create_call(
        &self,
        method: impl AsRef<str> + Into<String>,
        deadline: Option<Duration>,
        host_override: Option<String>,
        credentials: Arc<dyn CallCredentials>,
        listener: Arc<dyn ClientCallListener>,
        wait_for_ready: bool,
    ) -> CallHandle {
        let method = method.into();

        let (subchannel, pick_metadata) = match self.pick(wait_for_ready).await {
            Ok(pair) => pair,
            Err(status) => return CallHandle::failed(status, listener),
        };

        let authority = host_override
            .or_else(|| self.inner.options.default_authority().map(str::to_string))
            .unwrap_or_else(|| subchannel.address().authority());
        let service = method.splitn(3, '/').nth(1).unwrap_or("");
        let service_url = format!("https://{authority}/{service}");

        let mut metadata = match credentials.get_metadata(&service_url).await {
            Ok(metadata) => metadata,
            Err(status) => {
                subchannel.call_unref();
                return CallHandle::failed(status, listener);
            }
        };
        metadata.merge(&pick_metadata);

        let stream = match subchannel.open_stream() {
            Some(stream) => stream,
            None => {
                subchannel.call_unref();
                return CallHandle::failed(
                    Status::new(Code::Unavailable, "Connection dropped"),
                    listener,
                );
            }
        };

        let listener = Arc::new(CallUnrefListener {
            inner: listener,
            subchannel: subchannel.clone(),
        });
        let call = Http2CallStream::new(method, deadline, listener, self.inner.filter_stack.instantiate());
        call.spawn(stream, metadata, Some(authority), self.inner.options.user_agent())
    }

    /// The pick loop itself. A `Pick` is re-verified against the live
    /// subchannel state before being trusted (per §A.5, a suspension point —
    /// here, the await on the picker's own watch channel — requires
    /// re-checking state rather than acting on a stale snapshot); `Queue`,
    /// and `Fail` under `waitForReady`, wait for the next published picker
    /// and retry. `call_ref()` is taken on the winning subchannel before
    /// returning, released by `CallUnrefListener` once a terminal status is
    /// delivered.
    async fn pick(&self, wait_for_ready: bool) -> Result<(Arc<Subchannel>, Metadata), Status> {
        let mut lb_state_rx = self.inner.lb.lb_state.clone();
        loop {
            let state: LbState = lb_state_rx.borrow_and_update().clone();
            match state.picker.pick() {
                PickResult::Pick(pick) => {
                    let subchannel = self.inner.lb.subchannels.lock().get(&pick.subchannel).cloned();
                    match subchannel {
                        Some(subchannel) if subchannel.state().connectivity_state == ConnectivityState::Ready => {
                            subchannel.call_ref();
                            return Ok((subchannel, pick.extra_metadata));
                        }
                        Some(subchannel) => {
                            let mut subchannel_states = subchannel.subscribe();
                            tokio::select! {
                                _ = lb_state_rx.changed() => {}
                                _ = subchannel_states.changed() => {}
                            }
                        }
                        // The picker named a subchannel this load balancer no
                        // longer tracks (e.g. it was just torn down); wait
                        // for a fresher picker rather than looping tightly.
                        None => {
                            if lb_state_rx.changed().await.is_err() {
                                return Err(Status::new(Code::Unavailable, "channel shut down"));
                            }
                        }
                    }
                }
                PickResult::Queue => {
                    if lb_state_rx.changed().await.is_err() {
                        return Err(Status::new(Code::Unavailable, "channel shut down"));
                    }
                }
                PickResult::Fail(status) => {
                    if !wait_for_ready {
                        return Err(status);
                    }
                    if lb_state_rx.changed().await.is_err() {
                        return Err(status);
                    }
                }
                PickResult::Drop(status) => return Err(coerce_drop_status(status)),
            }
        }
    }
}

/// Control planes may drop a call with any non-OK status; `OK` itself isn't
/// a meaningful failure, so a picker that hands one back is a bug in the
/// policy, not a real outcome to surface — coerce it to `INTERNAL` instead
/// of silently succeeding a dropped call.
fn coerce_drop_status(status: Status) -> Status {
    if status.code == Code::Ok {
        Status::new(Code::Internal, "Drop picker result carried code OK")
    } else {
        status
    }
}

/// Wraps a caller's listener so the subchannel's call-ref is released
/// exactly once, alongside the one terminal status every call delivers.
struct CallUnrefListener {
    inner: Arc<dyn ClientCallListener>,
    subchannel: Arc<Subchannel>,
}

impl ClientCallListener for CallUnrefListener {
    fn on_receive_metadata(&self, metadata: Metadata) {
        self.inner.on_receive_metadata(metadata);
    }

    fn on_receive_message(&self, message: Bytes) {
        self.inner.on_receive_message(message);
    }

    fn on_receive_status(&self, status: Status) {
        self.subchannel.call_unref();
        self.inner.on_receive_status(status);
    }
}
