use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lease id of a game server. Always equal to the id of the ledger slot it holds.
pub type ServerId = usize;

/// Match id, unique within its server.
pub type MatchId = u64;

/// Upstream account credential handed to a game server with its lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
  pub access_token: String,
  pub refresh_token: String,
  /// Account name
  pub account: String,
  /// Account UUID
  pub uuid: String,
}

/// Lifecycle of a match. `End` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchState {
  Available,
  Accepting,
  Full,
  End,
}

impl MatchState {
  pub fn as_str(&self) -> &'static str {
    match self {
      MatchState::Available => "available",
      MatchState::Accepting => "accepting",
      MatchState::Full => "full",
      MatchState::End => "end",
    }
  }
}

impl fmt::Display for MatchState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MatchState {
  type Err = UnknownState;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "available" => Ok(MatchState::Available),
      "accepting" => Ok(MatchState::Accepting),
      "full" => Ok(MatchState::Full),
      "end" => Ok(MatchState::End),
      other => Err(UnknownState(other.to_string())),
    }
  }
}

/// State a game server reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
  Available,
  Lobby,
  Ingame,
  End,
}

impl ServerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServerState::Available => "available",
      ServerState::Lobby => "lobby",
      ServerState::Ingame => "ingame",
      ServerState::End => "end",
    }
  }
}

impl fmt::Display for ServerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ServerState {
  type Err = UnknownState;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "available" => Ok(ServerState::Available),
      "lobby" => Ok(ServerState::Lobby),
      "ingame" => Ok(ServerState::Ingame),
      "end" => Ok(ServerState::End),
      other => Err(UnknownState(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct UnknownState(pub String);

/// Network address and state of a leased server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
  pub ip: String,
  pub port: u16,
  pub state: ServerState,
}

/// Result of a successful `register_server`.
#[derive(Debug, Clone)]
pub struct RegisteredServer {
  pub id: ServerId,
  pub credential: Credential,
  pub ip: String,
  pub port: u16,
}

/// A player admitted into a match, waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
  pub token: String,
  pub server: ServerId,
  pub match_id: MatchId,
}

/// Point-in-time copy of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
  pub id: MatchId,
  pub server: ServerId,
  pub game: String,
  pub state: MatchState,
  pub players: Vec<String>,
  pub join_tokens: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_match_state_parsing() {
    assert_eq!("accepting".parse::<MatchState>(), Ok(MatchState::Accepting));
    assert_eq!("end".parse::<MatchState>(), Ok(MatchState::End));
    assert!("closed".parse::<MatchState>().is_err());
    assert_eq!(MatchState::Full.to_string(), "full");
  }

  #[test]
  fn test_server_state_parsing() {
    assert_eq!("ingame".parse::<ServerState>(), Ok(ServerState::Ingame));
    assert!("Lobby".parse::<ServerState>().is_err());
  }

  #[test]
  fn test_credential_wire_format() {
    let json = r#"{"access_token":"a","refresh_token":"r","account":"acc","uuid":"u"}"#;
    let credential: Credential = serde_json::from_str(json).unwrap();
    assert_eq!(credential.account, "acc");
    assert_eq!(serde_json::to_string(&credential).unwrap(), json);
  }
}
