use thiserror::Error;

use dpgraph_core::id::{ObjectId, PartyId};

/// Result type local to dpgraph-remote.
pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Core(#[from] dpgraph_core::Error),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unknown party {0}")]
    UnknownParty(PartyId),

    #[error("command `{0}` is not on the allow-list")]
    DisallowedCommand(String),

    #[error("`{op}` spans parties {lhs} and {rhs} and no secret-sharing backend is configured")]
    CrossPartyUnsupported {
        op: String,
        lhs: PartyId,
        rhs: PartyId,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("remote party failed: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Codec(e.to_string())
    }
}

impl From<serde_yaml::Error> for RemoteError {
    fn from(e: serde_yaml::Error) -> Self {
        RemoteError::Config(e.to_string())
    }
}
