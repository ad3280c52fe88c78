use shared::ProtocolState;

/// Contract violations reported by [`crate::session::Session`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a player is already attached to this session")]
    PlayerAlreadyAttached,
    #[error("illegal protocol state transition from {from} to {to}")]
    IllegalTransition {
        from: ProtocolState,
        to: ProtocolState,
    },
}
