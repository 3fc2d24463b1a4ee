use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Matchmaker;
use crate::error::{EngineError, Result};
use crate::matches::{Match, MatchRegistry};
use crate::models::{Admission, MatchId, ServerId};

/// A player's seat in a match, provisional until confirmed.
///
/// Lock order: a reservation's lock may be held while reading its match,
/// never the other way around.
pub struct Reservation {
  account: String,
  server: ServerId,
  match_ref: Arc<Match>,
  join_token: String,
  confirmed: Mutex<bool>,
}

impl Reservation {
  pub fn account(&self) -> &str {
    &self.account
  }

  pub fn server(&self) -> ServerId {
    self.server
  }

  pub fn match_id(&self) -> MatchId {
    self.match_ref.id()
  }

  pub fn join_token(&self) -> &str {
    &self.join_token
  }

  pub async fn is_confirmed(&self) -> bool {
    *self.confirmed.lock().await
  }
}

impl Matchmaker {
  pub async fn is_player_active(&self, account: &str) -> bool {
    self.inner.players.contains(&account.to_string()).await
  }

  /// Seat `account` in the best fillable match of `game`.
  ///
  /// Losing a race for the selected match drops it as the filling match and
  /// selects again. A match whose lease is gone, or that ended before the
  /// reservation was stored, is skipped the same way. Every retry leaves one
  /// less joinable match, so this ends once a seat is won or nothing is left.
  pub async fn queue_player(&self, game: &str, account: &str) -> Result<Admission> {
    if let Some(lapsed) = self
      .inner
      .players
      .take_expired(account.to_string(), Instant::now())
      .await
    {
      self.release_reservation(account, Some(lapsed)).await;
    }
    if self.is_player_active(account).await {
      return Err(EngineError::PlayerAlreadyQueued(account.to_string()));
    }
    let registry = self
      .registry(game)
      .await
      .ok_or_else(|| EngineError::NoJoinableMatch(game.to_string()))?;

    loop {
      let (m, token) = self.seat_player(&registry, account).await?;
      if let Some(admission) = self.store_reservation(&m, account, token).await? {
        debug!(game, account, server = admission.server, match_id = admission.match_id, "player admitted");
        return Ok(admission);
      }
    }
  }

  /// Select a match and take one of its tokens, retrying lost races.
  pub(crate) async fn seat_player(
    &self,
    registry: &MatchRegistry,
    account: &str,
  ) -> Result<(Arc<Match>, String)> {
    loop {
      let m = registry
        .select_fillable()
        .await
        .ok_or_else(|| EngineError::NoJoinableMatch(registry.game().to_string()))?;
      match m.admit_player(account).await {
        Some(token) => return Ok((m, token)),
        None => {
          warn!(game = registry.game(), account, match_id = m.id(), "lost admission race, selecting again");
          registry.invalidate(&m).await;
        }
      }
    }
  }

  /// Record the reservation for a seat won in `m`. Returns `None` when `m`
  /// turned out to be gone, after undoing the seat; the caller selects again.
  pub(crate) async fn store_reservation(
    &self,
    m: &Arc<Match>,
    account: &str,
    token: String,
  ) -> Result<Option<Admission>> {
    let Some(lease) = self.lease_owning(m).await else {
      warn!(server = m.server(), match_id = m.id(), "match outlived its lease, ending it");
      m.release_player(account, token).await;
      self.end_match(m).await;
      return Ok(None);
    };

    let reservation = Arc::new(Reservation {
      account: account.to_string(),
      server: m.server(),
      match_ref: m.clone(),
      join_token: token.clone(),
      confirmed: Mutex::new(false),
    });
    if self
      .inner
      .players
      .insert_new(account.to_string(), reservation.clone(), Instant::now())
      .await
      .is_err()
    {
      warn!(account, "player queued concurrently, rolling back seat");
      m.release_player(account, token).await;
      return Err(EngineError::PlayerAlreadyQueued(account.to_string()));
    }
    // A release still in flight may have left its entry behind
    match lease.players.entry_async(account.to_string()).await {
      scc::hash_map::Entry::Occupied(mut stale) => {
        *stale.get_mut() = reservation.clone();
      }
      scc::hash_map::Entry::Vacant(vacant) => {
        vacant.insert_entry(reservation.clone());
      }
    }

    // Ending `m` takes its players first, then deletes their reservations.
    // Still seated here means that deletion will see this reservation.
    if !m.has_player(account).await {
      warn!(account, match_id = m.id(), "match ended during admission, rolling back");
      self.release_reservation(account, Some(reservation)).await;
      return Ok(None);
    }
    Ok(Some(Admission {
      token,
      server: m.server(),
      match_id: m.id(),
    }))
  }

  /// Confirm a reservation with the token it was given. A confirmed
  /// reservation no longer expires.
  pub async fn confirm_player(&self, server: ServerId, account: &str, token: &str) -> Result<MatchId> {
    let key = account.to_string();
    let reservation = self
      .inner
      .players
      .get(&key)
      .await
      .ok_or_else(|| EngineError::PlayerNotFound(key.clone()))?;
    if reservation.server != server {
      return Err(EngineError::ServerMismatch { server, account: key });
    }

    let mut confirmed = reservation.confirmed.lock().await;
    if *confirmed {
      return Err(EngineError::AlreadyConfirmed(key));
    }
    if reservation.join_token != token {
      return Err(EngineError::TokenMismatch(key));
    }
    // The match may have been force-ended since admission
    if !reservation.match_ref.has_player(account).await {
      return Err(EngineError::PlayerNotFound(key));
    }
    let persisted = self
      .inner
      .players
      .persist_if(&key, |current| Arc::ptr_eq(current, &reservation))
      .await;
    if !persisted {
      return Err(EngineError::PlayerNotFound(key));
    }
    *confirmed = true;

    debug!(server, account, match_id = reservation.match_id(), "player confirmed");
    Ok(reservation.match_id())
  }

  /// Explicitly delete a player, giving its token back to the match.
  pub async fn delete_player(&self, account: &str) -> bool {
    self.release_reservation(account, None).await
  }

  /// Shared deletion path. With `known`, the entry may already be gone from
  /// the cache (TTL eviction, lease cascade); without it, an absent entry is
  /// a no-op.
  pub(crate) async fn release_reservation(
    &self,
    account: &str,
    known: Option<Arc<Reservation>>,
  ) -> bool {
    let reservation = match known {
      Some(reservation) => {
        self
          .inner
          .players
          .remove_if(account.to_string(), |current| Arc::ptr_eq(current, &reservation))
          .await;
        reservation
      }
      None => match self.inner.players.remove(&account.to_string()).await {
        Some(reservation) => reservation,
        None => return false,
      },
    };
    self.finish_release(&reservation).await;
    true
  }

  /// Delete `account` only if its reservation is for `m`. Used when `m` ends.
  pub(crate) async fn delete_player_in_match(&self, account: &str, m: &Arc<Match>) {
    let removed = self
      .inner
      .players
      .remove_if(account.to_string(), |current| Arc::ptr_eq(&current.match_ref, m))
      .await;
    if let Some(reservation) = removed {
      self.finish_release(&reservation).await;
    }
  }

  async fn finish_release(&self, reservation: &Arc<Reservation>) {
    if let Ok(lease) = self.lease(reservation.server).await {
      if let scc::hash_map::Entry::Occupied(entry) =
        lease.players.entry_async(reservation.account.clone()).await
      {
        if Arc::ptr_eq(entry.get(), reservation) {
          entry.remove_entry();
        }
      }
    }
    let returned = reservation
      .match_ref
      .release_player(&reservation.account, reservation.join_token.clone())
      .await;
    debug!(
      account = %reservation.account,
      match_id = reservation.match_id(),
      token_returned = returned,
      "player released"
    );
  }
}
