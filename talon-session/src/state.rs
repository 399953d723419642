//! The call lifecycle states shared by the client and server state
//! machines' bookkeeping (the two sides don't share a type, but they share
//! this shape: not yet attached to a transport, attached and exchanging
//! messages in one or both directions, or done).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    PickPending,
    Attached,
    HalfClosedLocal,
    HalfClosedRemote,
    Ended,
}

impl CallState {
    pub fn is_ended(self) -> bool {
        matches!(self, CallState::Ended)
    }
}
