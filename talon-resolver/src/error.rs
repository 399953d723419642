use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResolverError {
    #[error("no TXT record begins with \"grpc_config=\"")]
    NoServiceConfigRecord,
    #[error("invalid canary service-config JSON: {0}")]
    InvalidServiceConfigJson(String),
    #[error("no canary choice survived selection")]
    NoCanaryChoiceSelected,
    #[error("unsupported target URI scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("malformed target URI {0:?}")]
    MalformedTarget(String),
}
