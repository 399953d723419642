//! A subchannel: the owner of at most one live HTTP/2 connection to one
//! address. `talon_lb::SubchannelId` is the opaque handle LB policies key
//! pickers off; this type is the thing the id actually points to, owned
//! entirely by `talon-channel` (per §9's note that subchannels are held by a
//! channel-side pool with LB-side ref/unref handles).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use talon_lb::{Address, ConnectivityState, SubchannelId, SubchannelState as LbSubchannelState};
use talon_session::transport::ClientStream;
use talon_wire::{Code, Status};

use crate::backoff::Backoff;
use crate::connector::{Connection, Http2Connector};
use crate::options::ChannelOptions;

/// Owns at most one HTTP/2 connection to one address, and the reconnect
/// loop that keeps retrying it (with backoff) for as long as the
/// subchannel lives. `ref()`/`unref()` track LB-policy holders;
/// `call_ref()`/`call_unref()` track calls actively using the connection —
/// per §4.7 the subchannel may not be torn down while either is positive.
pub struct Subchannel {
    pub id: SubchannelId,
    address: Address,
    state_tx: watch::Sender<LbSubchannelState>,
    connection: Mutex<Option<Arc<Connection>>>,
    ref_count: AtomicUsize,
    call_count: AtomicUsize,
    wake_connect: Notify,
    shutdown: AtomicBool,
}

impl Subchannel {
    /// Spawns the subchannel in `Idle` and starts its lifetime task, which
    /// sleeps until the first `exit_idle()` call and then loops: connect,
    /// serve while `Ready`, and on any disconnection back off and retry —
    /// until `shutdown()` is called.
    pub fn spawn(
        address: Address,
        connector: Arc<dyn Http2Connector>,
        options: Arc<ChannelOptions>,
    ) -> Arc<Subchannel> {
        let (state_tx, _state_rx) = watch::channel(LbSubchannelState::idle());
        let subchannel = Arc::new(Subchannel {
            id: SubchannelId::next(),
            address,
            state_tx,
            connection: Mutex::new(None),
            ref_count: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            wake_connect: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Subchannel::run(subchannel.clone(), connector, options));
        subchannel
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> LbSubchannelState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LbSubchannelState> {
        self.state_tx.subscribe()
    }

    pub fn ref_(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unref(&self) {
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn call_ref(&self) {
        self.call_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn call_unref(&self) {
        self.call_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_unreferenced(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) == 0 && self.call_count.load(Ordering::Acquire) == 0
    }

    /// Leaves `Idle` and begins connecting; a no-op if already connecting,
    /// ready, or backing off towards a retry.
    pub fn exit_idle(&self) {
        self.wake_connect.notify_one();
    }

    /// Opens a new HTTP/2 stream on the current connection, if `Ready`.
    pub fn open_stream(&self) -> Option<Box<dyn ClientStream>> {
        self.connection.lock().as_ref().map(|c| c.open_stream())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake_connect.notify_one();
        self.connection.lock().take();
        let _ = self.state_tx.send(LbSubchannelState {
            connectivity_state: ConnectivityState::Shutdown,
            last_connection_error: None,
        });
    }

    fn publish(&self, state: LbSubchannelState) {
        let _ = self.state_tx.send(state);
    }

    async fn run(self: Arc<Subchannel>, connector: Arc<dyn Http2Connector>, options: Arc<ChannelOptions>) {
        let mut backoff = Backoff::new(&options);

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            // Idle until someone asks us to connect.
            self.wake_connect.notified().await;
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            self.publish(LbSubchannelState {
                connectivity_state: ConnectivityState::Connecting,
                last_connection_error: None,
            });

            match connector.connect(&self.address).await {
                Ok(connection) => {
                    backoff.reset();
                    let connection = Arc::new(connection);
                    *self.connection.lock() = Some(connection.clone());
                    self.publish(LbSubchannelState::ready());

                    self.wait_for_disconnect(&connection).await;

                    self.connection.lock().take();
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    self.publish(LbSubchannelState {
                        connectivity_state: ConnectivityState::Idle,
                        last_connection_error: None,
                    });
                    // A connection that was previously healthy is worth
                    // retrying immediately; re-notify ourselves instead of
                    // waiting for an external `exit_idle()`.
                    self.wake_connect.notify_one();
                }
                Err(status) => {
                    self.publish(LbSubchannelState::transient_failure(status));
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    self.wake_connect.notify_one();
                }
            }
        }
    }

    async fn wait_for_disconnect(&self, connection: &Arc<Connection>) {
        // `Connection::closed` takes `&mut self`, but the connection is
        // shared with every in-flight call's streams via `Arc`; a cloned
        // watch receiver lets us await disconnection without mutable access
        // to the shared connection.
        let mut closed = connection.closed_receiver();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysFails;

    #[async_trait]
    impl Http2Connector for AlwaysFails {
        async fn connect(&self, _address: &Address) -> Result<Connection, Status> {
            Err(Status::new(Code::Unavailable, "refused"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_publish_transient_failure_and_keep_retrying() {
        let options = Arc::new(
            ChannelOptions::builder()
                .backoff(
                    std::time::Duration::from_millis(10),
                    std::time::Duration::from_millis(50),
                    2.0,
                )
                .build(),
        );
        let subchannel = Subchannel::spawn(Address::new("127.0.0.1", 1), Arc::new(AlwaysFails), options);
        let mut states = subchannel.subscribe();
        subchannel.exit_idle();

        tokio::time::advance(std::time::Duration::from_millis(1)).await;
        states.changed().await.unwrap();
        assert_eq!(states.borrow().connectivity_state, ConnectivityState::Connecting);

        states.changed().await.unwrap();
        assert_eq!(states.borrow().connectivity_state, ConnectivityState::TransientFailure);

        tokio::time::advance(std::time::Duration::from_millis(200)).await;
        states.changed().await.unwrap();
        assert_eq!(states.borrow().connectivity_state, ConnectivityState::Connecting);

        subchannel.shutdown();
    }

    #[test]
    fn ref_counting_tracks_holders_and_calls() {
        let options = Arc::new(ChannelOptions::default());
        let subchannel = Subchannel::spawn(Address::new("127.0.0.1", 1), Arc::new(AlwaysFails), options);
        assert!(subchannel.is_unreferenced());
        subchannel.ref_();
        assert!(!subchannel.is_unreferenced());
        subchannel.call_ref();
        subchannel.unref();
        assert!(!subchannel.is_unreferenced());
        subchannel.call_unref();
        assert!(subchannel.is_unreferenced());
        subchannel.shutdown();
    }
}
