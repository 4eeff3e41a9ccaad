use thiserror::Error;

/// Errors surfaced synchronously to callers of the client facade.
///
/// Transient sync failures (network errors, stale payloads, corrupt ID-list
/// deltas) are handled internally and never reach this type; misuse of the
/// lifecycle is the only thing the caller has to deal with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server keys must be non-empty and start with \"server-\"")]
    InvalidServerKey,

    #[error("client must be initialized before calling other APIs")]
    NotInitialized,

    #[error("client has been shut down; create a new instance to re-initialize")]
    ShutDown,
}
