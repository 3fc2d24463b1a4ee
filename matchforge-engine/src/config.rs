use std::time::Duration;

/// Servers should heartbeat at least this often to keep their lease.
pub const RECOMMENDED_RENEW_INTERVAL: Duration = Duration::from_secs(20);

/// Timing of the engine's expiring state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Lifetime of a server lease without a heartbeat
  pub server_ttl: Duration,
  /// How long an admitted player has to confirm
  pub player_ttl: Duration,
  /// How often the reaper sweeps expired leases and reservations
  pub sweep_interval: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      server_ttl: Duration::from_secs(60),
      player_ttl: Duration::from_secs(30),
      sweep_interval: Duration::from_secs(1),
    }
  }
}
