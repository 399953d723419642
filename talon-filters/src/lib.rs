//! The per-call filter stack.
//!
//! A filter is a set of five asynchronous transforms, each an explicit
//! async boundary over one stage of a call: outgoing metadata, outgoing
//! message, incoming message, and incoming trailers (plus incoming
//! metadata). The stack composes N filters: send direction in registration
//! order, receive direction in reverse — the same shape as the teacher's
//! credit/cancellation session layer, but generalized from one fixed set of
//! checks into an arbitrary ordered chain of independently pluggable
//! filters.
//!
//! Each transform returns a `FilterOutcome`, an explicit `Continue(value) |
//! Fail(status)` sum type, rather than using exceptions for control flow.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use talon_wire::{Code, Metadata, Status};

/// The result of running one value through one stage of the filter chain.
#[derive(Debug, Clone)]
pub enum FilterOutcome<T> {
    Continue(T),
    Fail(Status),
}

impl<T> FilterOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FilterOutcome<U> {
        match self {
            FilterOutcome::Continue(v) => FilterOutcome::Continue(f(v)),
            FilterOutcome::Fail(s) => FilterOutcome::Fail(s),
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, FilterOutcome::Fail(_))
    }
}

/// One per-call filter instance. All five transforms default to a
/// passthrough so a filter that only cares about, say, outgoing metadata
/// doesn't need to implement the other four.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn send_metadata(&self, metadata: Metadata) -> FilterOutcome<Metadata> {
        FilterOutcome::Continue(metadata)
    }

    async fn receive_metadata(&self, metadata: Metadata) -> FilterOutcome<Metadata> {
        FilterOutcome::Continue(metadata)
    }

    async fn send_message(&self, message: Bytes) -> FilterOutcome<Bytes> {
        FilterOutcome::Continue(message)
    }

    async fn receive_message(&self, message: Bytes) -> FilterOutcome<Bytes> {
        FilterOutcome::Continue(message)
    }

    async fn receive_trailers(&self, status: Status) -> FilterOutcome<Status> {
        FilterOutcome::Continue(status)
    }
}

/// Creates one [`Filter`] instance per call, so filters may hold per-call
/// state (a request counter, a deadline clock, an interceptor's scratch
/// buffer) without that state leaking across calls that share a channel.
pub trait FilterFactory: Send + Sync {
    fn create(&self) -> Box<dyn Filter>;
}

impl<F> FilterFactory for F
where
    F: Fn() -> Box<dyn Filter> + Send + Sync,
{
    fn create(&self) -> Box<dyn Filter> {
        (self)()
    }
}

/// An ordered list of filter factories, shared across all calls on a
/// channel or server.
#[derive(Clone, Default)]
pub struct FilterStack {
    factories: Vec<Arc<dyn FilterFactory>>,
}

impl FilterStack {
    pub fn new() -> Self {
        FilterStack {
            factories: Vec::new(),
        }
    }

    pub fn push(&mut self, factory: Arc<dyn FilterFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    /// Instantiates one filter chain for a single call.
    pub fn instantiate(&self) -> FilterChain {
        FilterChain {
            filters: self.factories.iter().map(|f| f.create()).collect(),
        }
    }
}

/// The per-call instantiation of a [`FilterStack`].
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn empty() -> Self {
        FilterChain {
            filters: Vec::new(),
        }
    }

    /// Runs outgoing metadata through every filter in registration order.
    pub async fn send_metadata(&self, mut value: Metadata) -> FilterOutcome<Metadata> {
        for filter in &self.filters {
            match filter.send_metadata(value).await {
                FilterOutcome::Continue(v) => value = v,
                fail => return fail,
            }
        }
        FilterOutcome::Continue(value)
    }

    /// Runs incoming metadata through every filter in reverse registration
    /// order (the receive direction).
    pub async fn receive_metadata(&self, mut value: Metadata) -> FilterOutcome<Metadata> {
        for filter in self.filters.iter().rev() {
            match filter.receive_metadata(value).await {
                FilterOutcome::Continue(v) => value = v,
                fail => return fail,
            }
        }
        FilterOutcome::Continue(value)
    }

    pub async fn send_message(&self, mut value: Bytes) -> FilterOutcome<Bytes> {
        for filter in &self.filters {
            match filter.send_message(value).await {
                FilterOutcome::Continue(v) => value = v,
                fail => return fail,
            }
        }
        FilterOutcome::Continue(value)
    }

    pub async fn receive_message(&self, mut value: Bytes) -> FilterOutcome<Bytes> {
        for filter in self.filters.iter().rev() {
            match filter.receive_message(value).await {
                FilterOutcome::Continue(v) => value = v,
                fail => return fail,
            }
        }
        FilterOutcome::Continue(value)
    }

    pub async fn receive_trailers(&self, mut value: Status) -> FilterOutcome<Status> {
        for filter in self.filters.iter().rev() {
            match filter.receive_trailers(value).await {
                FilterOutcome::Continue(v) => value = v,
                fail => return fail,
            }
        }
        FilterOutcome::Continue(value)
    }
}

/// Errors from any filter in the receive chain are never surfaced to the
/// peer; they become a local `INTERNAL` status and end the call.
pub fn reclassify_receive_error(status: Status) -> Status {
    if status.code == Code::Internal {
        status
    } else {
        Status::new(Code::Internal, status.details)
    }
}

/// Errors from any filter in the send chain become a local client-side
/// cancellation carrying `INTERNAL`.
pub fn reclassify_send_error(status: Status) -> Status {
    reclassify_receive_error(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseDetails;

    #[async_trait]
    impl Filter for UppercaseDetails {
        async fn send_metadata(&self, mut metadata: Metadata) -> FilterOutcome<Metadata> {
            let _ = metadata.set(
                "x-seen",
                talon_wire::MetadataValue::Ascii("uppercase".into()),
            );
            FilterOutcome::Continue(metadata)
        }
    }

    struct RejectEverything;

    #[async_trait]
    impl Filter for RejectEverything {
        async fn receive_message(&self, _message: Bytes) -> FilterOutcome<Bytes> {
            FilterOutcome::Fail(Status::new(Code::FailedPrecondition, "nope"))
        }
    }

    struct TagOrder(&'static str, Arc<parking_lot_shim::Mutex<Vec<&'static str>>>);

    mod parking_lot_shim {
        pub use std::sync::Mutex;
    }

    #[async_trait]
    impl Filter for TagOrder {
        async fn send_metadata(&self, metadata: Metadata) -> FilterOutcome<Metadata> {
            self.1.lock().unwrap().push(self.0);
            FilterOutcome::Continue(metadata)
        }

        async fn receive_metadata(&self, metadata: Metadata) -> FilterOutcome<Metadata> {
            self.1.lock().unwrap().push(self.0);
            FilterOutcome::Continue(metadata)
        }
    }

    #[tokio::test]
    async fn send_direction_runs_in_registration_order() {
        let order = Arc::new(parking_lot_shim::Mutex::new(Vec::new()));
        let mut stack = FilterStack::new();
        let o1 = order.clone();
        stack.push(Arc::new(move || -> Box<dyn Filter> {
            Box::new(TagOrder("a", o1.clone()))
        }));
        let o2 = order.clone();
        stack.push(Arc::new(move || -> Box<dyn Filter> {
            Box::new(TagOrder("b", o2.clone()))
        }));

        let chain = stack.instantiate();
        chain.send_metadata(Metadata::new()).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn receive_direction_runs_in_reverse_order() {
        let order = Arc::new(parking_lot_shim::Mutex::new(Vec::new()));
        let mut stack = FilterStack::new();
        let o1 = order.clone();
        stack.push(Arc::new(move || -> Box<dyn Filter> {
            Box::new(TagOrder("a", o1.clone()))
        }));
        let o2 = order.clone();
        stack.push(Arc::new(move || -> Box<dyn Filter> {
            Box::new(TagOrder("b", o2.clone()))
        }));

        let chain = stack.instantiate();
        chain.receive_metadata(Metadata::new()).await;
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn send_metadata_passes_through_chain() {
        let mut stack = FilterStack::new();
        stack.push(Arc::new(|| Box::new(UppercaseDetails) as Box<dyn Filter>));
        let chain = stack.instantiate();

        match chain.send_metadata(Metadata::new()).await {
            FilterOutcome::Continue(metadata) => {
                assert!(metadata.contains_key("x-seen"));
            }
            FilterOutcome::Fail(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn receive_message_failure_short_circuits() {
        let mut stack = FilterStack::new();
        stack.push(Arc::new(|| Box::new(RejectEverything) as Box<dyn Filter>));
        let chain = stack.instantiate();

        match chain.receive_message(Bytes::from_static(b"x")).await {
            FilterOutcome::Fail(status) => assert_eq!(status.code, Code::FailedPrecondition),
            FilterOutcome::Continue(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn receive_errors_reclassify_to_internal() {
        let original = Status::new(Code::FailedPrecondition, "nope");
        let reclassified = reclassify_receive_error(original);
        assert_eq!(reclassified.code, Code::Internal);
        assert_eq!(reclassified.details, "nope");
    }

    #[test]
    fn already_internal_errors_pass_through_unchanged() {
        let original = Status::new(Code::Internal, "boom");
        let reclassified = reclassify_receive_error(original);
        assert_eq!(reclassified.code, Code::Internal);
        assert_eq!(reclassified.details, "boom");
    }
}
