//! The resolving load balancer (§4.8): composes a name `Resolver` with a
//! child `LbPolicy` selected by service config, applies the service-config
//! error-handling table, and retries failed resolutions with backoff. Not
//! itself an `LbPolicy` — it is the one fixed top-level policy a `Channel`
//! always runs, and it owns the subchannel pool entries its child creates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use talon_lb::{LbConfig, LbPolicy, LbState, ResolverUpdate, WorkScheduler};
use talon_resolver::{Resolver, ResolverListener, ResolverResult, Target};
use talon_wire::{Code, ServiceConfig, Status};

use crate::backoff::Backoff;
use crate::connector::Http2Connector;
use crate::controller::{Controller, LbEvent, SharedSubchannels};
use crate::options::ChannelOptions;

/// Requests a resolving load balancer can receive from outside its own run
/// loop (the channel forwards `Channel::resetConnectionBackoff` here; a
/// queued-call picker wakeup also funnels through the same event type, but
/// that path is internal — see [`LbEvent::ExitIdleRequested`]).
pub struct ResolvingLbHandle {
    pub lb_state: watch::Receiver<LbState>,
    pub subchannels: SharedSubchannels,
    event_tx: mpsc::UnboundedSender<LbEvent>,
}

impl ResolvingLbHandle {
    pub fn reset_backoff(&self) {
        let _ = self.event_tx.send(LbEvent::ResetBackoffRequested);
    }
}

struct ResolverBridge(mpsc::UnboundedSender<LbEvent>);

impl ResolverListener for ResolverBridge {
    fn on_result(&self, result: ResolverResult) {
        let _ = self.0.send(LbEvent::ResolverResult(result));
    }

    fn on_error(&self, status: Status) {
        let _ = self.0.send(LbEvent::ResolverError(status));
    }
}

struct WorkBridge(mpsc::UnboundedSender<LbEvent>);

impl WorkScheduler for WorkBridge {
    fn schedule_work(&self) {
        let _ = self.0.send(LbEvent::Work);
    }
}

struct ResolvingLoadBalancer {
    resolver: Box<dyn Resolver>,
    child: Box<dyn LbPolicy>,
    child_name: String,
    work_scheduler: Arc<dyn WorkScheduler>,
    connector: Arc<dyn Http2Connector>,
    options: Arc<ChannelOptions>,
    subchannels: SharedSubchannels,
    picker_tx: watch::Sender<LbState>,
    event_tx: mpsc::UnboundedSender<LbEvent>,
    last_service_config: Option<ServiceConfig>,
    resolution_backoff: Backoff,
    backing_off: bool,
    continue_resolving: bool,
}

/// Builds and spawns the resolving load balancer for `target`, returning a
/// handle the owning `Channel` uses to watch published `(state, picker)`
/// pairs and to request a backoff reset.
pub fn spawn(
    target: &Target,
    connector: Arc<dyn Http2Connector>,
    options: Arc<ChannelOptions>,
) -> Result<ResolvingLbHandle, Status> {
    let resolver_builder = talon_resolver::registry::lookup(&target.scheme).ok_or_else(|| {
        Status::new(
            Code::Unavailable,
            format!("no resolver registered for scheme {:?}", target.scheme),
        )
    })?;
    let resolver = resolver_builder.build(target);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (picker_tx, picker_rx) = watch::channel(LbState::initial());

    let work_scheduler: Arc<dyn WorkScheduler> = Arc::new(WorkBridge(event_tx.clone()));
    let default_name = default_service_config(&options)
        .and_then(|sc| sc.load_balancing_policy)
        .unwrap_or_else(|| "pick_first".to_string());
    let child_builder = talon_lb::registry::lookup(&default_name)
        .or_else(|| talon_lb::registry::lookup("pick_first"))
        .expect("pick_first is always registered");
    let child = child_builder.build(work_scheduler.clone());
    let resolution_backoff = Backoff::new(&options);
    let subchannels: SharedSubchannels = Arc::new(Mutex::new(HashMap::new()));

    let mut lb = ResolvingLoadBalancer {
        resolver,
        child,
        child_name: child_builder.name().to_string(),
        work_scheduler,
        connector,
        options,
        subchannels: subchannels.clone(),
        picker_tx,
        event_tx: event_tx.clone(),
        last_service_config: None,
        resolution_backoff,
        backing_off: false,
        continue_resolving: false,
    };

    lb.resolver.start(Arc::new(ResolverBridge(event_tx.clone())));
    tokio::spawn(lb.run(event_rx));

    Ok(ResolvingLbHandle {
        lb_state: picker_rx,
        subchannels,
        event_tx,
    })
}

fn default_service_config(options: &ChannelOptions) -> Option<ServiceConfig> {
    let json = options.default_service_config_json.as_deref()?;
    serde_json::from_str(json).ok()
}

impl ResolvingLoadBalancer {
    async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<LbEvent>) {
        while let Some(event) = event_rx.recv().await {
            match event {
                LbEvent::ResolverResult(result) => self.handle_resolver_result(result),
                LbEvent::ResolverError(status) => self.handle_resolver_error(status),
                LbEvent::SubchannelState(id, state) => {
                    let (child, mut controller) = self.split();
                    child.subchannel_update(id, &state, &mut controller);
                }
                LbEvent::Work => {
                    let (child, mut controller) = self.split();
                    child.work(&mut controller);
                }
                LbEvent::ExitIdleRequested => {
                    let (child, mut controller) = self.split();
                    child.exit_idle(&mut controller);
                }
                LbEvent::ResetBackoffRequested => {
                    self.child.reset_backoff();
                    self.resolution_backoff.reset();
                }
                LbEvent::ResolutionBackoffElapsed => {
                    self.backing_off = false;
                    if self.continue_resolving {
                        self.continue_resolving = false;
                        self.resolver.resolve_now();
                    }
                }
            }
        }
    }

    /// Splits `self` into disjoint mutable borrows of `child` and of
    /// everything else (wrapped as a fresh [`Controller`]), since an
    /// `LbPolicy` trait method needs both at once. Must be called fresh at
    /// each use site (not cached across a `self.child_name`/`self.child`
    /// reassignment) since both borrows run for as long as their bindings
    /// live.
    fn split(&mut self) -> (&mut Box<dyn LbPolicy>, Controller<'_>) {
        let ResolvingLoadBalancer {
            child,
            connector,
            options,
            subchannels,
            event_tx,
            picker_tx,
            resolver,
            ..
        } = self;
        let controller = Controller {
            connector: &*connector,
            options: &*options,
            subchannels: &*subchannels,
            event_tx: &*event_tx,
            picker_tx: &*picker_tx,
            resolver: &mut **resolver,
        };
        (child, controller)
    }

    fn handle_resolver_result(&mut self, result: ResolverResult) {
        self.resolution_backoff.reset();

        // The service-config error-handling table's first two rows: a
        // result with `Some` config adopts and remembers it; a result with
        // `None` clears whatever was remembered and falls back to the
        // channel's default.
        self.last_service_config = result.service_config.clone();
        let effective_config = result
            .service_config
            .or_else(|| default_service_config(&self.options));

        match select_child_policy(effective_config.as_ref()) {
            None => {
                let _ = self.picker_tx.send(LbState::transient_failure(Status::new(
                    Code::Unavailable,
                    "All load balancer options in service config are not compatible",
                )));
            }
            Some((builder, parsed_config)) => {
                if self.child_name != builder.name() {
                    self.child_name = builder.name().to_string();
                    self.child = builder.build(self.work_scheduler.clone());
                }
                let (child, mut controller) = self.split();
                child.resolver_update(
                    ResolverUpdate::Addresses {
                        addresses: result.addresses,
                        config: parsed_config.map(Arc::new),
                    },
                    &mut controller,
                );
            }
        }
    }

    fn handle_resolver_error(&mut self, status: Status) {
        // The table's last two rows: the child policy itself already
        // decides between "no addresses yet, surface failure" and "keep the
        // existing picker" based on whether it currently has any addresses
        // (see `talon_lb::policy::ResolverUpdate::Error`'s doc comment), so
        // forwarding unconditionally is correct for both.
        {
            let (child, mut controller) = self.split();
            child.resolver_update(ResolverUpdate::Error(status), &mut controller);
        }
        self.start_resolution_backoff();
    }

    fn start_resolution_backoff(&mut self) {
        if self.backing_off {
            self.continue_resolving = true;
            return;
        }
        self.backing_off = true;
        let delay = self.resolution_backoff.next_delay();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(LbEvent::ResolutionBackoffElapsed);
        });
    }
}

/// Picks the first `loadBalancingConfig` entry naming a registered policy;
/// falls back to `loadBalancingPolicy` (legacy single-name field), then to
/// `pick_first`. Returns `None` only when `loadBalancingConfig` was
/// non-empty and *none* of its entries named a registered policy — the
/// "report UNAVAILABLE" case in §4.8.
fn select_child_policy(
    config: Option<&ServiceConfig>,
) -> Option<(Arc<dyn talon_lb::LbPolicyBuilder>, Option<LbConfig>)> {
    let Some(config) = config else {
        return talon_lb::registry::lookup("pick_first").map(|b| (b, None));
    };

    for entry in &config.load_balancing_config {
        if let Some(object) = entry.as_object() {
            if let Some((name, raw_config)) = object.iter().next() {
                if let Some(builder) = talon_lb::registry::lookup(name) {
                    let parsed = builder.parse_config(&raw_config.to_string()).ok().flatten();
                    return Some((builder, parsed));
                }
            }
        }
    }
    if !config.load_balancing_config.is_empty() {
        return None;
    }

    if let Some(name) = &config.load_balancing_policy {
        return talon_lb::registry::lookup(name).map(|b| (b, None));
    }

    talon_lb::registry::lookup("pick_first").map(|b| (b, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_pick_first_with_no_service_config() {
        let (builder, config) = select_child_policy(None).unwrap();
        assert_eq!(builder.name(), "pick_first");
        assert!(config.is_none());
    }

    #[test]
    fn unsupported_load_balancing_config_entries_yield_none() {
        let config = ServiceConfig {
            load_balancing_policy: None,
            load_balancing_config: vec![serde_json::json!({"does_not_exist": {}})],
            method_config: Vec::new(),
        };
        assert!(select_child_policy(Some(&config)).is_none());
    }

    #[test]
    fn legacy_load_balancing_policy_field_is_honored() {
        let config = ServiceConfig {
            load_balancing_policy: Some("round_robin".to_string()),
            load_balancing_config: Vec::new(),
            method_config: Vec::new(),
        };
        let (builder, _) = select_child_policy(Some(&config)).unwrap();
        assert_eq!(builder.name(), "round_robin");
    }
}
