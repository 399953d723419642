//! `pick_first`: tries addresses in order, sticks with the first one that
//! becomes `Ready`, and only moves on if it is lost.

use std::sync::Arc;

use talon_wire::{Code, Status};

use crate::connectivity::ConnectivityState;
use crate::picker::{LbState, Pick, PickResult, Picker};
use crate::policy::{ChannelController, LbPolicy, LbPolicyBuilder, ResolverUpdate};
use crate::subchannel::{SubchannelId, SubchannelState};

pub struct PickFirstBuilder;

impl LbPolicyBuilder for PickFirstBuilder {
    fn build(&self, _work_scheduler: Arc<dyn crate::policy::WorkScheduler>) -> Box<dyn LbPolicy> {
        Box::new(PickFirstPolicy::default())
    }

    fn name(&self) -> &'static str {
        "pick_first"
    }
}

#[derive(Default)]
struct PickFirstPolicy {
    subchannels: Vec<SubchannelId>,
    ready: Option<SubchannelId>,
}

struct ReadyPicker(SubchannelId);

impl Picker for ReadyPicker {
    fn pick(&self) -> PickResult {
        PickResult::Pick(Pick::new(self.0))
    }
}

impl LbPolicy for PickFirstPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        channel_controller: &mut dyn ChannelController,
    ) {
        match update {
            ResolverUpdate::Addresses { addresses, .. } => {
                self.ready = None;
                self.subchannels = addresses
                    .iter()
                    .map(|addr| channel_controller.new_subchannel(addr))
                    .collect();
                channel_controller.update_picker(LbState::initial());
            }
            ResolverUpdate::Error(status) => {
                if self.subchannels.is_empty() {
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
                self.ready = Some(subchannel);
                channel_controller.update_picker(LbState {
                    connectivity_state: ConnectivityState::Ready,
                    picker: Arc::new(ReadyPicker(subchannel)),
                });
            }
            ConnectivityState::Idle if self.ready == Some(subchannel) => {
                self.ready = None;
                channel_controller.update_picker(LbState::initial());
            }
            ConnectivityState::TransientFailure => {
                if self.ready == Some(subchannel) {
                    self.ready = None;
                }
                if self.ready.is_none() {
                    let status = state
                        .last_connection_error
                        .clone()
                        .unwrap_or_else(|| Status::new(Code::Unavailable, "connection failed"));
                    channel_controller.update_picker(LbState::transient_failure(status));
                }
            }
            _ => {}
        }
    }

    fn exit_idle(&mut self, _channel_controller: &mut dyn ChannelController) {}
}
