//! Per-session protocol state machine.
//!
//! Transitions are a pure function of `(state, message kind)`. The transfer
//! service consults [`transition`] before dispatching a frame; an illegal
//! pair yields an `Error` reply and moves the session to [`ProtocolState::Error`].
//!
//! From `Error`, only `Close` (back to `Init`) or `Ack` (back to `Connected`)
//! recover the session. `Close` is accepted in every state and is a no-op
//! when the session is already at `Init`.

use crate::frame::MessageType;

/// Protocol state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Fresh connection, nothing negotiated
    Init,
    /// Handshake completed
    Connected,
    /// A transfer context is live
    Transferring,
    /// Last transfer committed successfully
    Completed,
    /// A protocol-level error occurred
    Error,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Target state for handling `kind` while in `state`, or `None` when the
/// kind is illegal in that state.
///
/// The returned state is the one entered after the frame is handled
/// *successfully*; a failing handler moves the session to
/// [`ProtocolState::Error`] regardless.
#[must_use]
pub const fn transition(state: ProtocolState, kind: MessageType) -> Option<ProtocolState> {
    use MessageType as M;
    use ProtocolState as S;

    // Close always resets; repeating it at Init is a no-op.
    if matches!(kind, M::Close) {
        return Some(S::Init);
    }
    // An inbound error report parks any session in the error state.
    if matches!(kind, M::Error | M::ListError) {
        return Some(S::Error);
    }

    match state {
        S::Init => match kind {
            M::Handshake => Some(S::Connected),
            _ => None,
        },
        S::Connected => match kind {
            M::Handshake | M::ListRequest | M::NlstRequest | M::Ack => Some(S::Connected),
            M::FileRequest | M::ResumeRequest => Some(S::Transferring),
            _ => None,
        },
        S::Transferring => match kind {
            // A new FileRequest supersedes the live context.
            M::FileRequest | M::ResumeRequest | M::FileData | M::FileMetadata | M::Ack => {
                Some(S::Transferring)
            }
            M::ListRequest | M::NlstRequest => Some(S::Transferring),
            M::ChecksumVerify => Some(S::Completed),
            _ => None,
        },
        S::Completed => match kind {
            M::FileRequest => Some(S::Transferring),
            M::ListRequest | M::NlstRequest | M::Ack => Some(S::Completed),
            _ => None,
        },
        S::Error => match kind {
            M::Ack => Some(S::Connected),
            _ => None,
        },
    }
}
