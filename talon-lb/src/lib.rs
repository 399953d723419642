//! The load-balancing policy plane: connectivity states, subchannel
//! handles, pickers, and the `LbPolicy`/`LbPolicyBuilder` contract that
//! pick-first, round-robin, and any child-wrapping composite policy
//! implement. Nothing in this crate opens a socket; that's `talon-channel`'s
//! job. A policy only decides which addresses become subchannels and how to
//! choose among the ones that come up.

pub mod address;
pub mod connectivity;
pub mod pick_first;
pub mod picker;
pub mod policy;
pub mod registry;
pub mod round_robin;
pub mod subchannel;

pub use address::Address;
pub use connectivity::ConnectivityState;
pub use picker::{LbState, Pick, PickResult, Picker, QueuingPicker};
pub use policy::{ChannelController, LbConfig, LbPolicy, LbPolicyBuilder, ResolverUpdate, WorkScheduler};
pub use subchannel::{SubchannelId, SubchannelState};
