//! A pure-userspace, gRPC-like HTTP/2 RPC runtime, built from independently
//! usable crates:
//!
//! - [`talon_wire`] — wire types: `Status`, `Metadata`, framing, service config.
//! - [`talon_codec`] — message framing/decoding.
//! - [`talon_filters`] — the per-call filter stack.
//! - [`talon_lb`] — load-balancing policies, pickers, subchannel state.
//! - [`talon_resolver`] — name resolution and service-config canary selection.
//! - [`talon_session`] — client/server call state machines.
//! - [`talon_channel`] — the resolving channel, subchannel pool, `h2` connector.
//! - [`talon_server`] — the method registry and `h2`-backed listener.
//!
//! This crate re-exports the pieces most programs need and adds two small
//! convenience entry points ([`client::connect`], [`server::run_tcp_server`])
//! over plain-text HTTP/2-over-TCP; anything more involved (TLS, custom
//! filters, a listener already bound elsewhere) composes the lower-level
//! crates directly.

pub use talon_channel::{
    CallCredentials, Channel, ChannelOptions, ChannelOptionsBuilder, Connection, FnCredentials,
    Http2Connector, NoCredentials, TcpH2Connector,
};
pub use talon_filters::{
    Filter, FilterChain, FilterFactory, FilterOutcome, FilterStack, reclassify_receive_error,
    reclassify_send_error,
};
pub use talon_lb::{
    Address, ChannelController, ConnectivityState, LbConfig, LbPolicy, LbPolicyBuilder, LbState,
    Pick, PickResult, Picker, ResolverUpdate, SubchannelId, SubchannelState, WorkScheduler,
};
pub use talon_resolver::{Resolver, ResolverBuilder, ResolverListener, ResolverResult, Target};
pub use talon_server::{MethodRegistry, MethodType, Server, ServerCallContext, ServerCallHandler};
pub use talon_session::{CallHandle, ClientCallListener, Http2CallStream};
pub use talon_wire::{
    Code, Metadata, MetadataError, MetadataValue, MethodConfig, ServiceConfig, Status,
};

/// Client-side convenience entry points.
pub mod client {
    use std::sync::Arc;

    use talon_channel::{Channel, ChannelOptions, TcpH2Connector};
    use talon_filters::FilterStack;
    use talon_wire::Status;

    /// Dials `target_uri` over plain-text HTTP/2-over-TCP with default
    /// options and no filters — the zero-configuration path. Build a
    /// `Channel` directly (with a custom `Http2Connector`, `ChannelOptions`,
    /// or `FilterStack`) for anything else.
    pub fn connect(target_uri: &str) -> Result<Channel, Status> {
        Channel::new(
            target_uri,
            Arc::new(TcpH2Connector),
            ChannelOptions::default(),
            FilterStack::new(),
        )
    }
}

/// Server-side convenience entry points.
pub mod server {
    use tokio::net::TcpListener;

    use talon_filters::FilterStack;
    use talon_server::{MethodRegistry, Server};
    use talon_wire::{Code, Status};

    /// Binds `addr` and serves `registry` forever with no filters. Build a
    /// `Server` directly (with a `FilterStack`, or a listener already bound
    /// elsewhere) for anything else.
    pub async fn run_tcp_server(addr: &str, registry: MethodRegistry) -> Result<(), Status> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Status::new(Code::Unavailable, format!("bind failed: {e}")))?;
        Server::new(registry, FilterStack::new()).serve(listener).await
    }
}
