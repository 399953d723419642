//! The method registry: `(path, handler)` pairs a `Server` dispatches
//! inbound streams against by `:path`. Registration happens once at
//! startup, mirroring the channel/LB-policy registries' write-once-then-
//! read-mostly pattern (§A.5).

use std::collections::HashMap;
use std::sync::Arc;

use talon_session::server::ServerCallHandler;
use talon_wire::{Code, Status};

/// Maps method paths (`/package.Service/Method`) to their handler.
/// Registering the same path twice is a configuration error, not a runtime
/// one, so it is rejected rather than silently overwriting the first
/// registration.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn ServerCallHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        path: impl Into<String>,
        handler: Arc<dyn ServerCallHandler>,
    ) -> Result<(), Status> {
        let path = path.into();
        if self.handlers.contains_key(&path) {
            return Err(Status::new(
                Code::AlreadyExists,
                format!("method {path:?} is already registered"),
            ));
        }
        self.handlers.insert(path, handler);
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<dyn ServerCallHandler>> {
        self.handlers.get(path).cloned()
    }
}
