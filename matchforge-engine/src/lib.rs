mod cache;
mod config;
mod error;
mod ledger;
mod matches;
mod models;
mod players;
mod servers;

pub use cache::TtlCache;
pub use config::{EngineConfig, RECOMMENDED_RENEW_INTERVAL};
pub use error::{EngineError, ErrorKind, LedgerError, Result};
pub use ledger::{CredentialStore, JsonFileStore, Ledger, MemoryStore};
pub use matches::{Match, MatchRegistry};
pub use models::{
  Admission, Credential, MatchId, MatchSnapshot, MatchState, RegisteredServer, ServerDetails,
  ServerId, ServerState, UnknownState,
};
pub use players::Reservation;
pub use servers::Lease;

use scc::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) struct Shared {
  pub(crate) config: EngineConfig,
  pub(crate) ledger: Ledger,
  pub(crate) servers: TtlCache<ServerId, Arc<Lease>>,
  pub(crate) games: HashMap<String, Arc<MatchRegistry>>,
  pub(crate) players: TtlCache<String, Arc<Reservation>>,
}

/// Handle to the allocation engine: server leases, match registries and
/// player reservations, backed by a credential ledger.
///
/// Cheap to clone; every clone sees the same state.
///
/// Locking: every lease, match and reservation has its own lock, and each
/// registry (lease cache, game map, match registry, player cache) has a lock
/// guarding membership only. A registry lock is always released before an
/// entity found through it is locked.
#[derive(Clone)]
pub struct Matchmaker {
  pub(crate) inner: Arc<Shared>,
}

/// What one sweep evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
  pub servers: usize,
  pub players: usize,
}

impl Matchmaker {
  pub fn new(ledger: Ledger, config: EngineConfig) -> Self {
    Self {
      inner: Arc::new(Shared {
        servers: TtlCache::new(config.server_ttl),
        players: TtlCache::new(config.player_ttl),
        games: HashMap::new(),
        ledger,
        config,
      }),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  pub fn ledger(&self) -> &Ledger {
    &self.inner.ledger
  }

  /// Add a credential obtained upstream. Persistence failure is fatal.
  pub async fn add_credential(&self, credential: Credential) -> Result<ServerId> {
    Ok(self.inner.ledger.append(credential).await?)
  }

  /// Replace the access token of the credential leased as `id`.
  pub async fn set_access_token(&self, id: ServerId, access_token: String) -> Result<()> {
    Ok(self.inner.ledger.replace_access_token(id, access_token).await?)
  }

  /// Evict leases and unconfirmed reservations that lapsed at `now`.
  ///
  /// Eviction only collects the entries; their cleanup runs on separate
  /// tasks once the caches are released. Returns after every cleanup ran.
  pub async fn sweep_expired(&self, now: Instant) -> SweepStats {
    let leases = self.inner.servers.evict_expired(now).await;
    let players = self.inner.players.evict_expired(now).await;
    let stats = SweepStats {
      servers: leases.len(),
      players: players.len(),
    };

    let mut cleanups = JoinSet::new();
    for (id, lease) in leases {
      info!(server = id, "lease expired");
      let engine = self.clone();
      cleanups.spawn(async move { engine.cleanup_lease(lease, true).await });
    }
    for (account, reservation) in players {
      debug!(%account, "unconfirmed reservation expired");
      let engine = self.clone();
      cleanups.spawn(async move {
        engine.release_reservation(&account, Some(reservation)).await;
      });
    }
    while let Some(joined) = cleanups.join_next().await {
      if let Err(err) = joined {
        warn!(?err, "expiry cleanup task failed");
      }
    }
    stats
  }

  /// Sweep on `sweep_interval` until the handle is aborted.
  pub fn spawn_reaper(&self) -> JoinHandle<()> {
    let engine = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(engine.inner.config.sweep_interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let stats = engine.sweep_expired(Instant::now()).await;
        if stats != SweepStats::default() {
          debug!(servers = stats.servers, players = stats.players, "expired entries swept");
        }
      }
    })
  }

  /// Drop all leases, matches and reservations and free every credential.
  pub async fn reset_all(&self) {
    self.inner.players.drain().await;
    for (_, lease) in self.inner.servers.drain().await {
      lease.matches.clear_async().await;
      lease.players.clear_async().await;
    }
    self.inner.games.clear_async().await;
    self.inner.ledger.release_all().await;
    info!("engine state reset");
  }
}
