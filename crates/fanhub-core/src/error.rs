//! The error taxonomy the Hub propagates, grouped by how each kind is
//! handled rather than by where it originates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Bad JSON, unknown action, or an oversized frame. Answered to the
    /// originator only; the connection stays open unless the frame
    /// violated the size cap.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The principal is not authorized for the scope it tried to join.
    /// The registries are left unchanged.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The principal's token bucket is empty. The frame is discarded and
    /// the connection stays open.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A collaborator returned not-found/conflict/server-error. Logged at
    /// info/warn; never broadcast.
    #[error("domain error: {0}")]
    Domain(String),

    /// Caught at the ingress consumer or egress worker; never propagates
    /// past the I/O owner. The originating client already has its
    /// local-first copy.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// Cannot declare topology at boot. The caller should abort the
    /// process; this is a cold-path error.
    #[error("fatal broker failure: {0}")]
    Fatal(String),

    /// The hub is already at `maxClients`.
    #[error("hub is at capacity")]
    AtCapacity,
}

impl HubError {
    /// The short tag sent to the client in `{status:"error", error:<tag>}`.
    /// Transient/Fatal errors never reach this conversion — they are
    /// handled entirely on the broker side of the boundary.
    pub fn client_tag(&self) -> String {
        match self {
            HubError::Protocol(msg) => format!("protocol error: {msg}"),
            HubError::Unauthorized(msg) => format!("unauthorized: {msg}"),
            HubError::RateLimited { .. } => "Rate limit exceeded, please slow down".to_string(),
            HubError::Domain(msg) => msg.clone(),
            HubError::AtCapacity => "hub is at capacity".to_string(),
            HubError::Transient(_) | HubError::Fatal(_) => "internal error".to_string(),
        }
    }
}
