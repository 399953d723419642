//! The LB policy contract: `updateAddressList`/`exitIdle`/`resetBackoff`/
//! `destroy`, plus the `ChannelController` the channel hands down so a
//! policy can create subchannels and publish pickers without owning the
//! channel itself.

use std::any::Any;
use std::sync::Arc;

use talon_wire::Status;

use crate::address::Address;
use crate::picker::LbState;
use crate::subchannel::{SubchannelId, SubchannelState};

/// What a resolver handed the LB policy: a fresh address list (and optional
/// service config), or a resolution error to react to. A policy receiving
/// `Error` while it has no addresses at all should publish a
/// `TransientFailure` picker carrying the status; if it already has
/// addresses, the existing picker is left in place (the old config is
/// presumed still usable).
pub enum ResolverUpdate {
    Addresses {
        addresses: Vec<Address>,
        config: Option<Arc<LbConfig>>,
    },
    Error(Status),
}

/// A type-erased, policy-specific parsed configuration, produced by
/// `LbPolicyBuilder::parse_config` and handed back unchanged on
/// `resolver_update`.
pub struct LbConfig {
    inner: Box<dyn Any + Send + Sync>,
}

impl LbConfig {
    pub fn new<T: Send + Sync + 'static>(config: T) -> Self {
        LbConfig {
            inner: Box::new(config),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

/// Requests a call back into the policy's `work` method without waiting for
/// the channel to deliver a resolver or subchannel update first — used by
/// policies with their own timers (e.g. a priority policy's failover clock).
pub trait WorkScheduler: Send + Sync {
    fn schedule_work(&self);
}

/// The channel-side handle an `LbPolicy` uses to create subchannels and
/// publish its decisions. One instance is passed to every trait method
/// call; policies must not retain it past the call.
pub trait ChannelController {
    fn new_subchannel(&mut self, address: &Address) -> SubchannelId;
    fn update_picker(&mut self, state: LbState);
    /// Asks the resolver to re-resolve, typically after repeated connection
    /// failures suggest the address list itself is stale.
    fn request_resolution(&mut self);
}

/// One running instance of a load-balancing policy. A policy owns no
/// transport: it only decides which addresses become subchannels and how to
/// pick among them, using `ChannelController` to effect both.
pub trait LbPolicy: Send {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        channel_controller: &mut dyn ChannelController,
    );

    fn subchannel_update(
        &mut self,
        subchannel: SubchannelId,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    );

    /// Called after a `WorkScheduler::schedule_work` request is honored.
    fn work(&mut self, _channel_controller: &mut dyn ChannelController) {}

    /// Requests the policy leave `Idle` and begin connecting, if it is
    /// currently idle. A no-op for policies that are never idle.
    fn exit_idle(&mut self, _channel_controller: &mut dyn ChannelController) {}

    /// Resets any connection backoff timers to their initial value.
    fn reset_backoff(&mut self) {}
}

/// Constructs `LbPolicy` instances and identifies the policy by name for the
/// service-config `loadBalancingConfig` selection algorithm.
pub trait LbPolicyBuilder: Send + Sync {
    fn build(&self, work_scheduler: Arc<dyn WorkScheduler>) -> Box<dyn LbPolicy>;

    fn name(&self) -> &'static str;

    /// Parses this policy's slice of a `loadBalancingConfig` entry. Default:
    /// policies that take no configuration.
    fn parse_config(&self, _raw_json: &str) -> Result<Option<LbConfig>, Status> {
        Ok(None)
    }
}
