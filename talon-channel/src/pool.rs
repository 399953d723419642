//! The process-wide subchannel pool (§5 "Shared-resource policy"): two
//! channels dialing the same address with the same channel args and the
//! same connector share one `Subchannel` rather than opening two
//! connections. Keyed by address authority plus the identity (not value) of
//! the connector and options, since two `ChannelOptions` with identical
//! fields but built for unrelated channels are not required to share a
//! connection — only an actual shared `Arc` does.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use talon_lb::Address;

use crate::connector::Http2Connector;
use crate::options::ChannelOptions;
use crate::subchannel::Subchannel;

type PoolKey = (String, usize, usize);

static POOL: OnceLock<Mutex<HashMap<PoolKey, Weak<Subchannel>>>> = OnceLock::new();

fn pool() -> &'static Mutex<HashMap<PoolKey, Weak<Subchannel>>> {
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

fn identity<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

/// Looks up (or creates) the subchannel for `address` under this
/// `(connector, options)` pair. Returns a strong reference; the pool itself
/// only ever holds a `Weak`, so a subchannel with no callers left is dropped
/// (and its background task exits) once every `Arc` handed out here goes
/// away.
pub struct SubchannelPool;

impl SubchannelPool {
    pub fn acquire(
        address: &Address,
        connector: &Arc<dyn Http2Connector>,
        options: &Arc<ChannelOptions>,
    ) -> Arc<Subchannel> {
        let key = (address.authority(), identity(connector), identity(options));
        let mut guard = pool().lock();
        if let Some(existing) = guard.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let subchannel = Subchannel::spawn(address.clone(), connector.clone(), options.clone());
        guard.insert(key, Arc::downgrade(&subchannel));
        subchannel
    }

    /// Drops dead entries. Not required for correctness (dead entries are
    /// replaced transparently on next `acquire`), but keeps the map from
    /// growing unboundedly in a process that churns through many short-lived
    /// channels to many distinct addresses.
    pub fn prune() {
        pool().lock().retain(|_, weak| weak.strong_count() > 0);
    }
}
