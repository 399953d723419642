//! Name resolution: parsing a target URI, dispatching to a scheme-specific
//! `Resolver`, and the TXT-record-like service-config canary selection
//! algorithm used once a resolver has service-config text in hand.

pub mod builtin;
pub mod canary;
mod error;
pub mod registry;
pub mod resolver;
pub mod target;

pub use builtin::{DnsResolveFn, DnsResolverBuilder};
pub use canary::{select_from_json, select_service_config, ClientContext};
pub use error::ResolverError;
pub use resolver::{to_lb_update, Resolver, ResolverBuilder, ResolverListener, ResolverResult};
pub use target::Target;
