//! The `Resolver` contract: turns a target URI into endpoint-list/service-
//! config updates (or errors) delivered to a listener, matching the
//! `ResolverUpdate` shape the load-balancing policy plane already consumes.

use talon_lb::{Address, ResolverUpdate};
use talon_wire::ServiceConfig;

/// One resolution result: a fresh address list plus an optional parsed
/// service config. Kept distinct from `talon_lb::ResolverUpdate` (which also
/// carries an LB-specific parsed config) since the resolving load balancer
/// is the one place that turns a `ResolverResult` into a `ResolverUpdate`
/// after running the service-config error-handling table.
#[derive(Debug, Clone)]
pub struct ResolverResult {
    pub addresses: Vec<Address>,
    pub service_config: Option<ServiceConfig>,
}

/// Receives updates from a running `Resolver`. The resolving load balancer
/// implements this to feed the service-config error-handling table.
pub trait ResolverListener: Send + Sync {
    fn on_result(&self, result: ResolverResult);
    fn on_error(&self, status: talon_wire::Status);
}

/// A name resolver instance bound to one target. `start` is called once;
/// implementations push zero or more updates to `listener` for as long as
/// they run (a `dns` resolver might re-resolve periodically; a static
/// resolver pushes exactly one update and is done).
pub trait Resolver: Send {
    fn start(&mut self, listener: std::sync::Arc<dyn ResolverListener>);

    /// Requests an immediate re-resolution, used after repeated connection
    /// failures suggest the address list is stale.
    fn resolve_now(&mut self) {}

    fn shutdown(&mut self) {}
}

/// Builds a `Resolver` for one scheme, given the parsed `Target`.
pub trait ResolverBuilder: Send + Sync {
    fn build(&self, target: &crate::target::Target) -> Box<dyn Resolver>;

    fn scheme(&self) -> &'static str;
}

/// Convenience: wraps a `ResolverResult` into the `talon_lb::ResolverUpdate`
/// shape the LB policy plane expects, with no LB-specific config attached.
pub fn to_lb_update(result: ResolverResult) -> ResolverUpdate {
    ResolverUpdate::Addresses {
        addresses: result.addresses,
        config: None,
    }
}
