//! Built-in resolver schemes. `ipv4`/`ipv6`/`unix` resolve synchronously
//! from the literal target text. `dns` is an external collaborator per this
//! runtime's scope (see the module doc on `DnsResolveFn`): we define the
//! hook a real DNS client plugs into, plus a resolver that uses it.

use std::sync::Arc;

use talon_lb::Address;
use talon_wire::Status;

use crate::resolver::{Resolver, ResolverBuilder, ResolverListener, ResolverResult};
use crate::target::Target;

fn parse_host_port(entry: &str, default_port: u16) -> Option<(String, u16)> {
    match entry.rsplit_once(':') {
        Some((host, port)) => port.parse::<u16>().ok().map(|p| (host.to_string(), p)),
        None => Some((entry.to_string(), default_port)),
    }
}

struct StaticListResolver {
    addresses: Vec<Address>,
}

impl Resolver for StaticListResolver {
    fn start(&mut self, listener: Arc<dyn ResolverListener>) {
        listener.on_result(ResolverResult {
            addresses: self.addresses.clone(),
            service_config: None,
        });
    }
}

pub struct Ipv4ResolverBuilder;

impl ResolverBuilder for Ipv4ResolverBuilder {
    fn build(&self, target: &Target) -> Box<dyn Resolver> {
        let addresses = target
            .path
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|entry| parse_host_port(entry, 443))
            .map(|(host, port)| Address::new(host, port))
            .collect();
        Box::new(StaticListResolver { addresses })
    }

    fn scheme(&self) -> &'static str {
        "ipv4"
    }
}

pub struct Ipv6ResolverBuilder;

impl ResolverBuilder for Ipv6ResolverBuilder {
    fn build(&self, target: &Target) -> Box<dyn Resolver> {
        let addresses = target
            .path
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|entry| parse_host_port(entry, 443))
            .map(|(host, port)| Address::new(host, port))
            .collect();
        Box::new(StaticListResolver { addresses })
    }

    fn scheme(&self) -> &'static str {
        "ipv6"
    }
}

pub struct UnixResolverBuilder;

impl ResolverBuilder for UnixResolverBuilder {
    fn build(&self, target: &Target) -> Box<dyn Resolver> {
        let address = Address::new(target.path.clone(), 0).with_attribute("transport", "unix");
        Box::new(StaticListResolver {
            addresses: vec![address],
        })
    }

    fn scheme(&self) -> &'static str {
        "unix"
    }
}

/// The hook a real DNS client implements. Kept separate from `Resolver`
/// itself so a `DnsResolverBuilder` can be constructed once with a hook and
/// reused across many targets.
pub trait DnsResolveFn: Send + Sync {
    fn resolve(&self, hostname: &str, port: u16) -> Result<Vec<Address>, Status>;
}

struct DnsResolver {
    hostname: String,
    port: u16,
    resolve_fn: Arc<dyn DnsResolveFn>,
}

impl Resolver for DnsResolver {
    #[tracing::instrument(skip(self, listener), fields(hostname = %self.hostname, port = self.port))]
    fn start(&mut self, listener: Arc<dyn ResolverListener>) {
        match self.resolve_fn.resolve(&self.hostname, self.port) {
            Ok(addresses) => {
                tracing::debug!(count = addresses.len(), "dns resolution succeeded");
                listener.on_result(ResolverResult {
                    addresses,
                    service_config: None,
                })
            }
            Err(status) => {
                tracing::warn!(%status, "dns resolution failed");
                listener.on_error(status)
            }
        }
    }

    fn resolve_now(&mut self) {}
}

pub struct DnsResolverBuilder {
    resolve_fn: Arc<dyn DnsResolveFn>,
}

impl DnsResolverBuilder {
    pub fn new(resolve_fn: Arc<dyn DnsResolveFn>) -> Self {
        DnsResolverBuilder { resolve_fn }
    }
}

impl ResolverBuilder for DnsResolverBuilder {
    fn build(&self, target: &Target) -> Box<dyn Resolver> {
        let (hostname, port) = parse_host_port(&target.path, 443).unwrap_or_default();
        Box::new(DnsResolver {
            hostname,
            port,
            resolve_fn: self.resolve_fn.clone(),
        })
    }

    fn scheme(&self) -> &'static str {
        "dns"
    }
}
