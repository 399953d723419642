//! Typed channel configuration, built once per `Channel` and shared (via
//! `Arc`) by every subchannel it creates. Mirrors the teacher's typed-builder
//! pattern for long-lived, validated configuration objects (see
//! `ServiceRegistryBuilder` in the reference `rapace-registry` crate):
//! fields are set through `with_*` methods on an owned builder, never
//! mutated again once a `Channel` is built from it.

use std::time::Duration;

/// Channel-wide settings that are not part of any particular call: identity
/// on the wire, keepalive cadence, message size limits, and the initial
/// service config to use before (or absent) a resolver-provided one.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub(crate) user_agent: String,
    pub(crate) keepalive_interval: Option<Duration>,
    pub(crate) keepalive_timeout: Duration,
    pub(crate) max_receive_message_bytes: usize,
    pub(crate) max_send_message_bytes: usize,
    pub(crate) default_service_config_json: Option<String>,
    pub(crate) default_authority: Option<String>,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) backoff_multiplier: f64,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            user_agent: concat!("talon/", env!("CARGO_PKG_VERSION")).to_string(),
            keepalive_interval: None,
            keepalive_timeout: Duration::from_secs(20),
            max_receive_message_bytes: 4 * 1024 * 1024,
            max_send_message_bytes: 4 * 1024 * 1024,
            default_service_config_json: None,
            default_authority: None,
            initial_backoff: Duration::from_millis(1_000),
            max_backoff: Duration::from_secs(120),
            backoff_multiplier: 1.6,
        }
    }
}

impl ChannelOptions {
    pub fn builder() -> ChannelOptionsBuilder {
        ChannelOptionsBuilder {
            options: ChannelOptions::default(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn default_authority(&self) -> Option<&str> {
        self.default_authority.as_deref()
    }

    pub fn max_receive_message_bytes(&self) -> usize {
        self.max_receive_message_bytes
    }

    pub fn max_send_message_bytes(&self) -> usize {
        self.max_send_message_bytes
    }
}

/// Builder for [`ChannelOptions`]. Every setter takes and returns `self` by
/// value so calls chain; build with [`ChannelOptionsBuilder::build`].
#[derive(Debug, Clone)]
pub struct ChannelOptionsBuilder {
    options: ChannelOptions,
}

impl ChannelOptionsBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    pub fn keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.options.keepalive_interval = Some(interval);
        self.options.keepalive_timeout = timeout;
        self
    }

    pub fn max_receive_message_bytes(mut self, bytes: usize) -> Self {
        self.options.max_receive_message_bytes = bytes;
        self
    }

    pub fn max_send_message_bytes(mut self, bytes: usize) -> Self {
        self.options.max_send_message_bytes = bytes;
        self
    }

    /// Service config JSON used until (and unless) the resolver supplies its
    /// own, per the resolving-load-balancer error-handling table.
    pub fn default_service_config_json(mut self, json: impl Into<String>) -> Self {
        self.options.default_service_config_json = Some(json.into());
        self
    }

    /// Overrides the `:authority` / `host` header sent on every call,
    /// instead of deriving it from the target.
    pub fn default_authority(mut self, authority: impl Into<String>) -> Self {
        self.options.default_authority = Some(authority.into());
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.options.initial_backoff = initial;
        self.options.max_backoff = max;
        self.options.backoff_multiplier = multiplier;
        self
    }

    pub fn build(self) -> ChannelOptions {
        self.options
    }
}
