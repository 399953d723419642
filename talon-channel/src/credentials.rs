//! The call-credentials callback: the one piece of the credential-plugin
//! surface this runtime actually implements (per scope, real credential
//! providers — TLS client certs, OAuth token refresh, etc. — are external
//! collaborators; we only need a metadata-producing hook callable from the
//! channel executor).

use async_trait::async_trait;

use talon_wire::{Metadata, Status};

/// Produces per-call metadata (typically `authorization`) given the
/// service URL the call targets. Implementations must not block; if
/// acquiring a token requires I/O, do it asynchronously.
#[async_trait]
pub trait CallCredentials: Send + Sync {
    async fn get_metadata(&self, service_url: &str) -> Result<Metadata, Status>;
}

/// The default: no credentials attached.
pub struct NoCredentials;

#[async_trait]
impl CallCredentials for NoCredentials {
    async fn get_metadata(&self, _service_url: &str) -> Result<Metadata, Status> {
        Ok(Metadata::new())
    }
}

/// Wraps a plain closure as `CallCredentials`, for callers that don't need
/// per-call state (matches the `Fn`-to-trait blanket impl pattern already
/// used by `talon_filters::FilterFactory`).
pub struct FnCredentials<F>(pub F);

#[async_trait]
impl<F> CallCredentials for FnCredentials<F>
where
    F: Fn(&str) -> Result<Metadata, Status> + Send + Sync,
{
    async fn get_metadata(&self, service_url: &str) -> Result<Metadata, Status> {
        (self.0)(service_url)
    }
}
