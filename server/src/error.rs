use shared::DecodeError;
use std::io;
use thiserror::Error;

use crate::registry::SessionId;

/// Errors raised by the relay server.
///
/// Only `Bind` and `Init` are fatal; everything else is scoped to one
/// connection and handled inside the tick.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server full ({capacity} sessions)")]
    CapacityExceeded { capacity: usize },
    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to send to session {id}")]
    SendFailure { id: SessionId },
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to start runtime: {0}")]
    Init(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
