//! `round_robin`: sends each pick to the next `Ready` subchannel in a
//! rotating list, rebuilding the rotation whenever the ready set changes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use talon_wire::{Code, Status};

use crate::connectivity::ConnectivityState;
use crate::picker::{LbState, Pick, PickResult, Picker};
use crate::policy::{ChannelController, LbPolicy, LbPolicyBuilder, ResolverUpdate};
use crate::subchannel::{SubchannelId, SubchannelState};

pub struct RoundRobinBuilder;

impl LbPolicyBuilder for RoundRobinBuilder {
    fn build(&self, _work_scheduler: Arc<dyn crate::policy::WorkScheduler>) -> Box<dyn LbPolicy> {
        Box::new(RoundRobinPolicy::default())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[derive(Default)]
struct RoundRobinPolicy {
    all: Vec<SubchannelId>,
    ready: Vec<SubchannelId>,
}

struct RoundRobinPicker {
    ready: Vec<SubchannelId>,
    next: AtomicUsize,
}

impl Picker for RoundRobinPicker {
    fn pick(&self) -> PickResult {
        if self.ready.is_empty() {
            return PickResult::Queue;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.ready.len();
        PickResult::Pick(Pick::new(self.ready[i]))
    }
}

impl RoundRobinPolicy {
    fn publish(&self, channel_controller: &mut dyn ChannelController) {
        if self.ready.is_empty() {
            channel_controller.update_picker(LbState::initial());
        } else {
            channel_controller.update_picker(LbState {
                connectivity_state: ConnectivityState::Ready,
                picker: Arc::new(RoundRobinPicker {
                    ready: self.ready.clone(),
                    next: AtomicUsize::new(0),
                }),
            });
        }
    }
}

impl LbPolicy for RoundRobinPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        channel_controller: &mut dyn ChannelController,
    ) {
        match update {
            ResolverUpdate::Addresses { addresses, .. } => {
                self.ready.clear();
                self.all = addresses
                    .iter()
                    .map(|addr| channel_controller.new_subchannel(addr))
                    .collect();
                self.publish(channel_controller);
            }
            ResolverUpdate::Error(status) => {
                if self.all.is_empty() {
                    channel_controller.update_picker(LbState::transient_failure(status));
                }
            }
        }
    }

    fn subchannel_update(
        &mut self,
        subchannel: SubchannelId,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        match state.connectivity_state {
            ConnectivityState::Ready => {
                if !self.ready.contains(&subchannel) {
                    self.ready.push(subchannel);
                }
                self.publish(channel_controller);
            }
            ConnectivityState::Idle | ConnectivityState::TransientFailure => {
                self.ready.retain(|s| s != &subchannel);
                if self.ready.is_empty() {
                    let status = state
                        .last_connection_error
                        .clone()
                        .unwrap_or_else(|| Status::new(Code::Unavailable, "no ready backends"));
                    channel_controller.update_picker(LbState::transient_failure(status));
                } else {
                    self.publish(channel_controller);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::picker::LbState as _LbState;

    struct FakeController {
        published: Vec<ConnectivityState>,
        last_picker: Option<Arc<dyn Picker>>,
    }

    impl FakeController {
        fn new() -> Self {
            FakeController {
                published: Vec::new(),
                last_picker: None,
            }
        }
    }

    impl ChannelController for FakeController {
        fn new_subchannel(&mut self, _address: &Address) -> SubchannelId {
            SubchannelId::next()
        }

        fn update_picker(&mut self, state: _LbState) {
            self.published.push(state.connectivity_state);
            self.last_picker = Some(state.picker);
        }

        fn request_resolution(&mut self) {}
    }

    #[test]
    fn picks_rotate_across_ready_subchannels() {
        let mut policy = RoundRobinPolicy::default();
        let mut controller = FakeController::new();
        policy.resolver_update(
            ResolverUpdate::Addresses {
                addresses: vec![Address::new("a", 1), Address::new("b", 1)],
                config: None,
            },
            &mut controller,
        );
        let (a, b) = (policy.all[0], policy.all[1]);
        policy.subchannel_update(a, &SubchannelState::ready(), &mut controller);
        policy.subchannel_update(b, &SubchannelState::ready(), &mut controller);

        let picker = controller.last_picker.take().unwrap();
        let mut picks = Vec::new();
        for _ in 0..4 {
            if let PickResult::Pick(pick) = picker.pick() {
                picks.push(pick.subchannel);
            }
        }
        assert_eq!(picks, vec![a, b, a, b]);
    }

    #[test]
    fn all_subchannels_lost_yields_transient_failure() {
        let mut policy = RoundRobinPolicy::default();
        let mut controller = FakeController::new();
        policy.resolver_update(
            ResolverUpdate::Addresses {
                addresses: vec![Address::new("a", 1)],
                config: None,
            },
            &mut controller,
        );
        let a = policy.all[0];
        policy.subchannel_update(a, &SubchannelState::ready(), &mut controller);
        policy.subchannel_update(
            a,
            &SubchannelState::transient_failure(Status::new(Code::Unavailable, "dropped")),
            &mut controller,
        );
        assert_eq!(
            controller.published.last(),
            Some(&ConnectivityState::TransientFailure)
        );
    }
}
