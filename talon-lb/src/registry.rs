//! The global LB-policy-type registry: a write-once-at-startup, read-mostly
//! map from policy name to builder, consulted when selecting a policy named
//! in a service config's `loadBalancingConfig` list.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pick_first::PickFirstBuilder;
use crate::policy::LbPolicyBuilder;
use crate::round_robin::RoundRobinBuilder;

static REGISTRY: RwLock<Option<HashMap<&'static str, Arc<dyn LbPolicyBuilder>>>> =
    RwLock::new(None);

fn with_default_registry() -> HashMap<&'static str, Arc<dyn LbPolicyBuilder>> {
    let mut map: HashMap<&'static str, Arc<dyn LbPolicyBuilder>> = HashMap::new();
    register_into(&mut map, Arc::new(PickFirstBuilder));
    register_into(&mut map, Arc::new(RoundRobinBuilder));
    map
}

fn register_into(map: &mut HashMap<&'static str, Arc<dyn LbPolicyBuilder>>, builder: Arc<dyn LbPolicyBuilder>) {
    map.insert(builder.name(), builder);
}

/// Registers (or replaces) a policy builder under its own name. Intended to
/// be called during process startup, before any channel is created.
pub fn register(builder: Arc<dyn LbPolicyBuilder>) {
    let mut guard = REGISTRY.write();
    let map = guard.get_or_insert_with(with_default_registry);
    register_into(map, builder);
}

/// Looks up a policy builder by name, lazily populating the registry with
/// the built-in policies (`pick_first`, `round_robin`) on first use.
pub fn lookup(name: &str) -> Option<Arc<dyn LbPolicyBuilder>> {
    let mut guard = REGISTRY.write();
    let map = guard.get_or_insert_with(with_default_registry);
    map.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_are_registered_by_default() {
        assert!(lookup("pick_first").is_some());
        assert!(lookup("round_robin").is_some());
    }

    #[test]
    fn unknown_policy_name_is_none() {
        assert!(lookup("does_not_exist").is_none());
    }
}
