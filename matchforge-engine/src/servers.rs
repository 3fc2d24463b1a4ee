use scc::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::Matchmaker;
use crate::error::{EngineError, Result};
use crate::matches::Match;
use crate::models::{MatchId, RegisteredServer, ServerDetails, ServerId, ServerState};
use crate::players::Reservation;

/// One generation of a server's claim on a ledger credential.
///
/// The match and player maps belong to this generation only. Registering the
/// same id again creates a new `Lease` with empty maps.
pub struct Lease {
  id: ServerId,
  details: RwLock<ServerDetails>,
  pub(crate) matches: HashMap<MatchId, Arc<Match>>,
  pub(crate) players: HashMap<String, Arc<Reservation>>,
}

impl Lease {
  fn new(id: ServerId, ip: String, port: u16) -> Self {
    Self {
      id,
      details: RwLock::new(ServerDetails {
        ip,
        port,
        state: ServerState::Available,
      }),
      matches: HashMap::new(),
      players: HashMap::new(),
    }
  }

  pub fn id(&self) -> ServerId {
    self.id
  }

  pub async fn details(&self) -> ServerDetails {
    self.details.read().await.clone()
  }

  pub fn match_count(&self) -> usize {
    self.matches.len()
  }

  pub fn player_count(&self) -> usize {
    self.players.len()
  }
}

impl Matchmaker {
  pub(crate) async fn lease(&self, id: ServerId) -> Result<Arc<Lease>> {
    self
      .inner
      .servers
      .get(&id)
      .await
      .ok_or(EngineError::ServerNotFound(id))
  }

  /// Whether `lease` is still the live generation of its id.
  pub(crate) async fn lease_is_current(&self, lease: &Arc<Lease>) -> bool {
    self
      .inner
      .servers
      .get(&lease.id)
      .await
      .is_some_and(|current| Arc::ptr_eq(&current, lease))
  }

  /// The live lease generation that owns `m`, if there still is one.
  pub(crate) async fn lease_owning(&self, m: &Arc<Match>) -> Option<Arc<Lease>> {
    let lease = self.lease(m.server()).await.ok()?;
    let owned = lease
      .matches
      .read_async(&m.id(), |_, current| Arc::ptr_eq(current, m))
      .await
      .unwrap_or(false);
    owned.then_some(lease)
  }

  /// Lease a free credential to a new game server.
  pub async fn register_server(&self, game: &str, ip: &str, port: u16) -> Result<RegisteredServer> {
    let (id, credential) = self
      .inner
      .ledger
      .acquire_free()
      .await
      .ok_or(EngineError::NoFreeCredential)?;
    self.create_server(id, ip, port).await;
    info!(server = id, game, ip, port, "server registered");
    Ok(RegisteredServer {
      id,
      credential,
      ip: ip.to_string(),
      port,
    })
  }

  /// Create or overwrite the lease `id` with a fresh TTL and empty
  /// collections. Returns whether a live lease was overwritten.
  ///
  /// The displaced generation's matches and players are cleaned up; its
  /// credential stays with the new generation.
  pub async fn create_server(&self, id: ServerId, ip: &str, port: u16) -> bool {
    self.inner.ledger.mark_used(id).await;
    let lease = Arc::new(Lease::new(id, ip.to_string(), port));
    let displaced = self.inner.servers.insert(id, lease, Instant::now()).await;
    match displaced {
      Some(old) => {
        warn!(server = id, "lease re-registered, cleaning up previous generation");
        let engine = self.clone();
        let cleanup = tokio::spawn(async move { engine.cleanup_lease(old, false).await });
        if let Err(err) = cleanup.await {
          warn!(?err, server = id, "lease cleanup task failed");
        }
        true
      }
      None => {
        debug!(server = id, ip, port, "lease created");
        false
      }
    }
  }

  /// Heartbeat. Extends the TTL of a live lease, never resurrects one.
  pub async fn refresh_server(&self, id: ServerId) -> bool {
    let refreshed = self.inner.servers.touch(&id, Instant::now()).await;
    if !refreshed {
      debug!(server = id, "refresh for unknown server ignored");
    }
    refreshed
  }

  pub async fn set_server_state(&self, id: ServerId, state: ServerState) -> bool {
    match self.lease(id).await {
      Ok(lease) => {
        lease.details.write().await.state = state;
        debug!(server = id, %state, "server state changed");
        true
      }
      Err(_) => false,
    }
  }

  pub async fn server_details(&self, id: ServerId) -> Result<ServerDetails> {
    Ok(self.lease(id).await?.details().await)
  }

  pub async fn server_exists(&self, id: ServerId) -> bool {
    self.inner.servers.contains(&id).await
  }

  /// Tear down everything a lease generation owns. Runs outside every cache
  /// lock: players are released on their own tasks, then each match is ended.
  pub(crate) async fn cleanup_lease(&self, lease: Arc<Lease>, release_credential: bool) {
    let id = lease.id;
    if release_credential {
      self.inner.ledger.release(id).await;
    }

    let mut players = Vec::new();
    lease
      .players
      .retain_async(|account, reservation| {
        players.push((account.clone(), reservation.clone()));
        false
      })
      .await;
    let mut matches = Vec::new();
    lease
      .matches
      .retain_async(|_, m| {
        matches.push(m.clone());
        false
      })
      .await;

    let mut tasks = JoinSet::new();
    for (account, reservation) in players {
      let engine = self.clone();
      tasks.spawn(async move {
        engine.release_reservation(&account, Some(reservation)).await;
      });
    }
    for m in &matches {
      self.end_match(m).await;
    }
    while let Some(joined) = tasks.join_next().await {
      if let Err(err) = joined {
        warn!(?err, server = id, "player release task failed");
      }
    }
    info!(server = id, matches = matches.len(), "lease cleaned up");
  }
}
