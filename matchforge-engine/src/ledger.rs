use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::LedgerError;
use crate::models::{Credential, ServerId};

/// Persistence collaborator of the ledger.
pub trait CredentialStore: Send + Sync {
  /// Load the full credential list. Creates an empty store when none exists.
  fn load_all(&self) -> Result<Vec<Credential>, LedgerError>;

  /// Replace the stored list with `credentials`.
  fn save_all(&self, credentials: &[Credential]) -> Result<(), LedgerError>;
}

/// Credentials stored as a flat JSON array in a single file.
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub const FILE_NAME: &'static str = "tokens.json";

  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Store at `<dir>/tokens.json`.
  pub fn in_dir(dir: impl AsRef<Path>) -> Self {
    Self::new(dir.as_ref().join(Self::FILE_NAME))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl CredentialStore for JsonFileStore {
  fn load_all(&self) -> Result<Vec<Credential>, LedgerError> {
    let content = match std::fs::read(&self.path) {
      Ok(content) => content,
      Err(err) if err.kind() == ErrorKind::NotFound => {
        info!(path = %self.path.display(), "no credential file, creating an empty one");
        self.save_all(&[])?;
        return Ok(Vec::new());
      }
      Err(err) => return Err(LedgerError::Io(err)),
    };
    serde_json::from_slice(&content).map_err(LedgerError::Parse)
  }

  fn save_all(&self, credentials: &[Credential]) -> Result<(), LedgerError> {
    let bytes = serde_json::to_vec(credentials).map_err(LedgerError::Encode)?;
    std::fs::write(&self.path, bytes)?;
    Ok(())
  }
}

/// In-process store (useful for testing).
#[derive(Default)]
pub struct MemoryStore {
  credentials: std::sync::Mutex<Vec<Credential>>,
}

impl MemoryStore {
  pub fn new(credentials: Vec<Credential>) -> Self {
    Self {
      credentials: std::sync::Mutex::new(credentials),
    }
  }

  /// What was last saved.
  pub fn saved(&self) -> Vec<Credential> {
    self
      .credentials
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl CredentialStore for MemoryStore {
  fn load_all(&self) -> Result<Vec<Credential>, LedgerError> {
    Ok(self.saved())
  }

  fn save_all(&self, credentials: &[Credential]) -> Result<(), LedgerError> {
    *self
      .credentials
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = credentials.to_vec();
    Ok(())
  }
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
  fn load_all(&self) -> Result<Vec<Credential>, LedgerError> {
    (**self).load_all()
  }

  fn save_all(&self, credentials: &[Credential]) -> Result<(), LedgerError> {
    (**self).save_all(credentials)
  }
}

struct CredentialSlot {
  used: bool,
  credential: Credential,
}

/// Fixed pool of pre-provisioned credentials, each loaned to at most one lease.
///
/// A credential's id is its position in the store; the `slots` lock guards
/// membership only and each slot carries its own lock.
pub struct Ledger {
  store: Box<dyn CredentialStore>,
  slots: RwLock<Vec<Arc<Mutex<CredentialSlot>>>>,
  /// Serializes snapshots written to the store.
  persist: Mutex<()>,
}

impl Ledger {
  /// Load every stored credential, all marked unused.
  pub fn load(store: impl CredentialStore + 'static) -> Result<Self, LedgerError> {
    let credentials = store.load_all()?;
    info!(count = credentials.len(), "credential ledger loaded");
    let slots = credentials
      .into_iter()
      .map(|credential| {
        Arc::new(Mutex::new(CredentialSlot {
          used: false,
          credential,
        }))
      })
      .collect();
    Ok(Self {
      store: Box::new(store),
      slots: RwLock::new(slots),
      persist: Mutex::new(()),
    })
  }

  async fn snapshot(&self) -> Vec<Arc<Mutex<CredentialSlot>>> {
    self.slots.read().await.clone()
  }

  async fn slot(&self, id: ServerId) -> Option<Arc<Mutex<CredentialSlot>>> {
    self.slots.read().await.get(id).cloned()
  }

  /// Claim the first unused credential.
  pub async fn acquire_free(&self) -> Option<(ServerId, Credential)> {
    for (id, slot) in self.snapshot().await.into_iter().enumerate() {
      let mut slot = slot.lock().await;
      if !slot.used {
        slot.used = true;
        debug!(credential = id, "credential acquired");
        return Some((id, slot.credential.clone()));
      }
    }
    None
  }

  /// Mark a credential unused again. Unknown ids are ignored.
  pub async fn release(&self, id: ServerId) {
    if let Some(slot) = self.slot(id).await {
      slot.lock().await.used = false;
      debug!(credential = id, "credential released");
    }
  }

  /// Mark a credential as used without scanning. Returns false for unknown ids.
  pub async fn mark_used(&self, id: ServerId) -> bool {
    match self.slot(id).await {
      Some(slot) => {
        slot.lock().await.used = true;
        true
      }
      None => false,
    }
  }

  pub async fn is_used(&self, id: ServerId) -> Option<bool> {
    match self.slot(id).await {
      Some(slot) => Some(slot.lock().await.used),
      None => None,
    }
  }

  pub async fn credential(&self, id: ServerId) -> Option<Credential> {
    match self.slot(id).await {
      Some(slot) => Some(slot.lock().await.credential.clone()),
      None => None,
    }
  }

  /// Add a new credential and persist. Returns its id.
  pub async fn append(&self, credential: Credential) -> Result<ServerId, LedgerError> {
    let id = {
      let mut slots = self.slots.write().await;
      slots.push(Arc::new(Mutex::new(CredentialSlot {
        used: false,
        credential,
      })));
      slots.len() - 1
    };
    self.persist_all().await?;
    info!(credential = id, "credential appended");
    Ok(id)
  }

  /// Swap the access token of a credential in place and persist.
  pub async fn replace_access_token(
    &self,
    id: ServerId,
    access_token: String,
  ) -> Result<(), LedgerError> {
    let slot = self.slot(id).await.ok_or(LedgerError::UnknownCredential(id))?;
    slot.lock().await.credential.access_token = access_token;
    self.persist_all().await?;
    debug!(credential = id, "access token replaced");
    Ok(())
  }

  /// Mark every credential unused.
  pub async fn release_all(&self) {
    for slot in self.snapshot().await {
      slot.lock().await.used = false;
    }
  }

  pub async fn len(&self) -> usize {
    self.slots.read().await.len()
  }

  pub async fn free_count(&self) -> usize {
    let mut free = 0;
    for slot in self.snapshot().await {
      if !slot.lock().await.used {
        free += 1;
      }
    }
    free
  }

  async fn persist_all(&self) -> Result<(), LedgerError> {
    let _guard = self.persist.lock().await;
    let mut credentials = Vec::new();
    for slot in self.snapshot().await {
      credentials.push(slot.lock().await.credential.clone());
    }
    self.store.save_all(&credentials).inspect_err(|err| {
      error!(?err, "failed to persist credential ledger");
    })
  }
}
