//! The global resolver-scheme registry: a write-once-at-startup, read-mostly
//! map from URI scheme to builder.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::builtin::{Ipv4ResolverBuilder, Ipv6ResolverBuilder, UnixResolverBuilder};
use crate::resolver::ResolverBuilder;

static REGISTRY: RwLock<Option<HashMap<&'static str, Arc<dyn ResolverBuilder>>>> =
    RwLock::new(None);

fn with_default_registry() -> HashMap<&'static str, Arc<dyn ResolverBuilder>> {
    let mut map: HashMap<&'static str, Arc<dyn ResolverBuilder>> = HashMap::new();
    map.insert("ipv4", Arc::new(Ipv4ResolverBuilder));
    map.insert("ipv6", Arc::new(Ipv6ResolverBuilder));
    map.insert("unix", Arc::new(UnixResolverBuilder));
    map
}

/// Registers (or replaces) a scheme builder. `dns` has no built-in entry
/// (DNS resolution libraries are an external collaborator per scope); a
/// process that needs it registers a `DnsResolverBuilder` at startup. `xds`
/// likewise has no built-in entry.
pub fn register(builder: Arc<dyn ResolverBuilder>) {
    let mut guard = REGISTRY.write();
    let map = guard.get_or_insert_with(with_default_registry);
    map.insert(builder.scheme(), builder);
}

pub fn lookup(scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
    let mut guard = REGISTRY.write();
    let map = guard.get_or_insert_with(with_default_registry);
    map.get(scheme).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_ipv6_unix_are_registered_by_default() {
        assert!(lookup("ipv4").is_some());
        assert!(lookup("ipv6").is_some());
        assert!(lookup("unix").is_some());
    }

    #[test]
    fn dns_is_not_registered_until_a_caller_supplies_one() {
        assert!(lookup("dns").is_none());
    }
}
