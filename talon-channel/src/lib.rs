//! The resolving channel (§4.7–4.9): a process-wide subchannel pool, the
//! resolving load balancer that drives it, and the `Channel` façade
//! applications create calls against. The real `h2`-backed `Http2Connector`
//! lives here too, since dialing a connection is this crate's job, not
//! `talon-session`'s (which only drives a stream once one exists).

mod backoff;
mod channel;
mod connector;
mod controller;
mod credentials;
mod options;
mod pool;
mod resolving_lb;
mod subchannel;

pub use channel::Channel;
pub use connector::{Connection, Http2Connector, TcpH2Connector};
pub use credentials::{CallCredentials, FnCredentials, NoCredentials};
pub use options::{ChannelOptions, ChannelOptionsBuilder};
pub use resolving_lb::ResolvingLbHandle;
pub use subchannel::Subchannel;
