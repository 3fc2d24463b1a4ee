use scc::hash_map::Entry;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::models::{MatchId, MatchSnapshot, MatchState, ServerId};
use crate::Matchmaker;
use crate::servers::Lease;

struct MatchInner {
  state: MatchState,
  players: Vec<String>,
  join_tokens: VecDeque<String>,
  /// Set when admission emptied the pool, so a released token can reopen it.
  filled_by_admission: bool,
}

impl MatchInner {
  fn joinable(&self) -> bool {
    self.state == MatchState::Accepting && !self.join_tokens.is_empty()
  }
}

/// A match advertised by a game server. Capacity is the pool of join tokens
/// handed over at advertisement.
pub struct Match {
  id: MatchId,
  server: ServerId,
  game: String,
  inner: RwLock<MatchInner>,
}

impl Match {
  pub(crate) fn new(id: MatchId, server: ServerId, game: String, tokens: Vec<String>) -> Self {
    Self {
      id,
      server,
      game,
      inner: RwLock::new(MatchInner {
        state: MatchState::Available,
        players: Vec::new(),
        join_tokens: tokens.into(),
        filled_by_admission: false,
      }),
    }
  }

  pub fn id(&self) -> MatchId {
    self.id
  }

  pub fn server(&self) -> ServerId {
    self.server
  }

  pub fn game(&self) -> &str {
    &self.game
  }

  pub async fn state(&self) -> MatchState {
    self.inner.read().await.state
  }

  pub async fn can_be_joined(&self) -> bool {
    self.inner.read().await.joinable()
  }

  pub async fn player_count(&self) -> usize {
    self.inner.read().await.players.len()
  }

  pub async fn has_player(&self, account: &str) -> bool {
    self.inner.read().await.players.iter().any(|p| p == account)
  }

  pub async fn snapshot(&self) -> MatchSnapshot {
    let inner = self.inner.read().await;
    MatchSnapshot {
      id: self.id,
      server: self.server,
      game: self.game.clone(),
      state: inner.state,
      players: inner.players.clone(),
      join_tokens: inner.join_tokens.iter().cloned().collect(),
    }
  }

  /// Seat `account` and hand out the oldest pooled token, in one step.
  /// Returns `None` if the match stopped being joinable.
  pub(crate) async fn admit_player(&self, account: &str) -> Option<String> {
    let mut inner = self.inner.write().await;
    if !inner.joinable() {
      return None;
    }
    let token = inner.join_tokens.pop_front()?;
    inner.players.push(account.to_string());
    if inner.join_tokens.is_empty() {
      inner.state = MatchState::Full;
      inner.filled_by_admission = true;
      debug!(match_id = self.id, server = self.server, "match filled");
    }
    Some(token)
  }

  /// Unseat `account` and return its token to the pool. Only a seated player
  /// gives a token back, and an ended match takes nothing back.
  pub(crate) async fn release_player(&self, account: &str, token: String) -> bool {
    let mut inner = self.inner.write().await;
    let Some(pos) = inner.players.iter().position(|p| p == account) else {
      return false;
    };
    inner.players.remove(pos);
    if inner.state == MatchState::End {
      return false;
    }
    inner.join_tokens.push_back(token);
    if inner.state == MatchState::Full && inner.filled_by_admission {
      inner.state = MatchState::Accepting;
      inner.filled_by_admission = false;
    }
    true
  }

  /// Apply a state change. Nothing leaves `End`.
  pub(crate) async fn set_state(&self, state: MatchState) -> Result<()> {
    let mut inner = self.inner.write().await;
    if inner.state == MatchState::End {
      return Err(EngineError::MatchEnded(self.id));
    }
    inner.state = state;
    inner.filled_by_admission = false;
    Ok(())
  }

  /// Force the match into `End` and hand back everyone still seated.
  pub(crate) async fn end(&self) -> Vec<String> {
    let mut inner = self.inner.write().await;
    inner.state = MatchState::End;
    inner.join_tokens.clear();
    std::mem::take(&mut inner.players)
  }
}

struct RegistryInner {
  matches: Vec<Arc<Match>>,
  filling: Option<Weak<Match>>,
}

/// All matches of one game plus the cached match currently being filled.
///
/// The registry lock only guards membership. It is never held while a
/// match's own lock is taken.
pub struct MatchRegistry {
  game: String,
  inner: RwLock<RegistryInner>,
}

impl MatchRegistry {
  pub fn new(game: impl Into<String>) -> Self {
    Self {
      game: game.into(),
      inner: RwLock::new(RegistryInner {
        matches: Vec::new(),
        filling: None,
      }),
    }
  }

  pub fn game(&self) -> &str {
    &self.game
  }

  pub async fn add(&self, m: Arc<Match>) {
    self.inner.write().await.matches.push(m);
  }

  pub async fn remove(&self, m: &Arc<Match>) {
    let mut inner = self.inner.write().await;
    inner.matches.retain(|other| !Arc::ptr_eq(other, m));
    if inner
      .filling
      .as_ref()
      .is_some_and(|filling| filling.as_ptr() == Arc::as_ptr(m))
    {
      inner.filling = None;
    }
  }

  /// Forget the filling match if it is `m`.
  pub async fn invalidate(&self, m: &Arc<Match>) {
    let mut inner = self.inner.write().await;
    if inner
      .filling
      .as_ref()
      .is_some_and(|filling| filling.as_ptr() == Arc::as_ptr(m))
    {
      inner.filling = None;
    }
  }

  pub async fn get(&self, server: ServerId, id: MatchId) -> Option<Arc<Match>> {
    self
      .inner
      .read()
      .await
      .matches
      .iter()
      .find(|m| m.server == server && m.id == id)
      .cloned()
  }

  pub async fn matches(&self) -> Vec<Arc<Match>> {
    self.inner.read().await.matches.clone()
  }

  pub async fn len(&self) -> usize {
    self.inner.read().await.matches.len()
  }

  /// The match that should receive the next player.
  ///
  /// Reuses the cached filling match while it stays joinable. Otherwise drops
  /// ended matches and picks the joinable match with the most players, the
  /// first one encountered winning ties.
  pub async fn select_fillable(&self) -> Option<Arc<Match>> {
    let cached = self
      .inner
      .read()
      .await
      .filling
      .as_ref()
      .and_then(Weak::upgrade);
    if let Some(m) = cached {
      if m.can_be_joined().await {
        return Some(m);
      }
    }

    let candidates = self.matches().await;
    let mut ended = Vec::new();
    let mut best: Option<(usize, Arc<Match>)> = None;
    for m in candidates {
      let (state, players, joinable) = {
        let inner = m.inner.read().await;
        (inner.state, inner.players.len(), inner.joinable())
      };
      if state == MatchState::End {
        ended.push(m);
        continue;
      }
      if joinable && best.as_ref().is_none_or(|(count, _)| players > *count) {
        best = Some((players, m));
      }
    }
    let best = best.map(|(_, m)| m);

    let mut inner = self.inner.write().await;
    if !ended.is_empty() {
      inner
        .matches
        .retain(|m| !ended.iter().any(|e| Arc::ptr_eq(m, e)));
    }
    inner.filling = best.as_ref().map(Arc::downgrade);
    best
  }
}

impl Matchmaker {
  async fn registry_or_create(&self, game: &str) -> Arc<MatchRegistry> {
    self
      .inner
      .games
      .entry_async(game.to_string())
      .await
      .or_insert_with(|| Arc::new(MatchRegistry::new(game)))
      .get()
      .clone()
  }

  pub async fn registry(&self, game: &str) -> Option<Arc<MatchRegistry>> {
    self
      .inner
      .games
      .read_async(game, |_, registry| registry.clone())
      .await
  }

  pub(crate) async fn match_on_server(
    &self,
    server: ServerId,
    match_id: MatchId,
  ) -> Result<Arc<Match>> {
    let lease = self.lease(server).await?;
    lease
      .matches
      .read_async(&match_id, |_, m| m.clone())
      .await
      .ok_or(EngineError::MatchNotFound { server, match_id })
  }

  /// Register a new match under a live lease and in its game's registry.
  /// The match starts out `available`.
  pub async fn advertise_match(
    &self,
    server: ServerId,
    match_id: MatchId,
    game: &str,
    tokens: Vec<String>,
  ) -> Result<()> {
    if tokens.is_empty() {
      return Err(EngineError::EmptyTokenPool);
    }
    let lease = self.lease(server).await?;
    self.advertise_on(&lease, match_id, game, tokens).await
  }

  /// Advertise into a lease generation found earlier. If that generation
  /// expired or was replaced meanwhile, its cleanup may already have run, so
  /// the match is ended here instead of outliving it.
  pub(crate) async fn advertise_on(
    &self,
    lease: &Arc<Lease>,
    match_id: MatchId,
    game: &str,
    tokens: Vec<String>,
  ) -> Result<()> {
    let server = lease.id();
    let m = Arc::new(Match::new(match_id, server, game.to_string(), tokens));
    lease
      .matches
      .insert_async(match_id, m.clone())
      .await
      .map_err(|_| EngineError::DuplicateMatch { server, match_id })?;
    self.registry_or_create(game).await.add(m.clone()).await;

    if !self.lease_is_current(lease).await {
      warn!(server, match_id, game, "lease gone during advertisement, ending match");
      self.end_match(&m).await;
      return Err(EngineError::ServerNotFound(server));
    }
    debug!(server, match_id, game, "match advertised");
    Ok(())
  }

  /// Change a match's state. Ending a match takes it out of its lease and
  /// registry and deletes every player still listed in it.
  pub async fn set_match_state(
    &self,
    server: ServerId,
    match_id: MatchId,
    state: MatchState,
  ) -> Result<()> {
    let m = self.match_on_server(server, match_id).await?;
    if state != MatchState::End {
      m.set_state(state).await?;
      if state != MatchState::Accepting {
        if let Some(registry) = self.registry(m.game()).await {
          registry.invalidate(&m).await;
        }
      }
      debug!(server, match_id, %state, "match state changed");
      return Ok(());
    }

    if m.state().await == MatchState::End {
      return Err(EngineError::MatchEnded(match_id));
    }
    self.end_match(&m).await;
    if let Ok(lease) = self.lease(server).await {
      if let Entry::Occupied(existing) = lease.matches.entry_async(match_id).await {
        if Arc::ptr_eq(existing.get(), &m) {
          existing.remove_entry();
        }
      }
    }
    debug!(server, match_id, "match ended");
    Ok(())
  }

  /// End `m`, drop it from its registry and delete its players concurrently.
  pub(crate) async fn end_match(&self, m: &Arc<Match>) {
    let players = m.end().await;
    if let Some(registry) = self.registry(m.game()).await {
      registry.remove(m).await;
    }

    let mut deletions = tokio::task::JoinSet::new();
    for account in players {
      let engine = self.clone();
      let m = m.clone();
      deletions.spawn(async move { engine.delete_player_in_match(&account, &m).await });
    }
    while let Some(joined) = deletions.join_next().await {
      if let Err(err) = joined {
        warn!(?err, match_id = m.id(), "player deletion task failed");
      }
    }
  }

  pub async fn match_snapshot(&self, server: ServerId, match_id: MatchId) -> Result<MatchSnapshot> {
    Ok(self.match_on_server(server, match_id).await?.snapshot().await)
  }

  /// Snapshots of every match currently registered for `game`.
  pub async fn registry_snapshot(&self, game: &str) -> Vec<MatchSnapshot> {
    let Some(registry) = self.registry(game).await else {
      return Vec::new();
    };
    let mut snapshots = Vec::new();
    for m in registry.matches().await {
      snapshots.push(m.snapshot().await);
    }
    snapshots
  }
}
