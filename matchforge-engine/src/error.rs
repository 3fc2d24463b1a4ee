use thiserror::Error;

use crate::models::{MatchId, ServerId};

/// Failures of the credential ledger's persistence collaborator.
///
/// Every one of these is fatal for the process: the ledger is the source of
/// truth for which accounts exist.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger file could not be parsed: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("ledger could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("credential {0} does not exist")]
    UnknownCredential(ServerId),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("server {0} not found")]
    ServerNotFound(ServerId),

    #[error("match {match_id} not found on server {server}")]
    MatchNotFound { server: ServerId, match_id: MatchId },

    #[error("player {0} not found")]
    PlayerNotFound(String),

    #[error("match {match_id} was already advertised on server {server}")]
    DuplicateMatch { server: ServerId, match_id: MatchId },

    #[error("player {0} is already queued or playing")]
    PlayerAlreadyQueued(String),

    #[error("player {0} was already confirmed")]
    AlreadyConfirmed(String),

    #[error("join token does not match the reservation of {0}")]
    TokenMismatch(String),

    #[error("player {account} is not reserved on server {server}")]
    ServerMismatch { server: ServerId, account: String },

    #[error("match {0} has ended")]
    MatchEnded(MatchId),

    #[error("empty join token pool")]
    EmptyTokenPool,

    #[error("no joinable match for game {0}")]
    NoJoinableMatch(String),

    #[error("no free credential in the ledger")]
    NoFreeCredential,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Coarse grouping used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    /// The request itself can never succeed as given.
    Invalid,
    Exhausted,
    Fatal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ServerNotFound(_)
            | EngineError::MatchNotFound { .. }
            | EngineError::PlayerNotFound(_)
            | EngineError::Ledger(LedgerError::UnknownCredential(_)) => ErrorKind::NotFound,
            EngineError::DuplicateMatch { .. }
            | EngineError::PlayerAlreadyQueued(_)
            | EngineError::AlreadyConfirmed(_)
            | EngineError::TokenMismatch(_)
            | EngineError::ServerMismatch { .. }
            | EngineError::MatchEnded(_) => ErrorKind::Conflict,
            EngineError::EmptyTokenPool => ErrorKind::Invalid,
            EngineError::NoJoinableMatch(_) | EngineError::NoFreeCredential => ErrorKind::Exhausted,
            EngineError::Ledger(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
