use thiserror::Error;

/// Error kinds surfaced outward across every swarm component.
///
/// Transport errors are locally recovered by retry and degradation inside
/// [`crate::distributor::WorkDistributor`]; SLO and attestation errors are
/// surfaced to the caller and to [`crate::verifier::OutcomeVerifier`];
/// aggregation timeouts resolve with partial results rather than rejecting
/// whenever any partial data exists. No error kind terminates the process —
/// only an explicit `stop()` on the owning actor does.
#[derive(Debug, Error, Clone)]
pub enum SwarmError {
    /// Malformed request body. Maps to HTTP 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Heartbeat, cancel, or lookup for a `node_id` not in the peer table.
    /// Maps to HTTP 404.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Feature not wired (e.g. no external-trigger listener installed).
    /// Maps to HTTP 501.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// DCT verification failed, attestation mismatched, or a caveat denied
    /// the requested action.
    #[error("capability violation: {0}")]
    CapabilityViolation(String),

    /// Result exceeded contract SLO bounds (strict mode only).
    #[error("SLO violation: {0}")]
    SloViolation(String),

    /// Delegation, checkpoint, or aggregation exceeded its window.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Repeated transport failures against a peer; propagated as a degrade
    /// signal to `WorkDistributor`.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
}

impl SwarmError {
    /// HTTP status code this error kind maps to, where the spec defines one.
    /// Kinds without an explicit mapping (capability/SLO/timeout/unreachable)
    /// are surfaced as 500 by the transport layer's generic error handler.
    pub fn status_code(&self) -> u16 {
        match self {
            SwarmError::Validation(_) => 400,
            SwarmError::UnknownPeer(_) => 404,
            SwarmError::Unimplemented(_) => 501,
            SwarmError::CapabilityViolation(_) => 403,
            SwarmError::SloViolation(_) => 422,
            SwarmError::Timeout(_) => 504,
            SwarmError::PeerUnreachable(_) => 502,
        }
    }
}

pub type SwarmResult<T> = Result<T, SwarmError>;
