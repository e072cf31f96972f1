use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::Mutex,
};
use thiserror::Error;
use tracing::{info, warn};

/// The durable record: which channel to mirror into and how to re-mint tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotState {
    #[serde(default)]
    pub target_channel_id: Option<String>,
    #[serde(default)]
    pub spotify_refresh_token: Option<String>,
}

/// Fields to merge into the record. `None` leaves a field untouched,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub target_channel_id: Option<Option<String>>,
    pub spotify_refresh_token: Option<Option<String>>,
}

impl StatePatch {
    pub fn refresh_token(token: Option<String>) -> Self {
        StatePatch {
            spotify_refresh_token: Some(token),
            ..Default::default()
        }
    }

    pub fn target_channel(id: Option<String>) -> Self {
        StatePatch {
            target_channel_id: Some(id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<BotState>,
}

impl CredentialStore {
    /// Loads the record, writing defaults when the file is missing or unusable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (state, rewrite) = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => {
                warn!("{} is empty, recreating with defaults", path.display());
                (BotState::default(), true)
            }
            Ok(raw) => match serde_json::from_str::<BotState>(&raw) {
                Ok(state) => (state, false),
                Err(e) => {
                    warn!("{} is corrupt ({e}), recreating with defaults", path.display());
                    (BotState::default(), true)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found, creating with defaults", path.display());
                (BotState::default(), true)
            }
            Err(e) => {
                warn!("Could not read {} ({e}), recreating with defaults", path.display());
                (BotState::default(), true)
            }
        };

        let store = CredentialStore {
            path,
            state: Mutex::new(state),
        };
        if rewrite {
            if let Err(e) = store.save(StatePatch::default()) {
                warn!("{e}");
            }
        } else {
            let snapshot = store.snapshot();
            info!(
                "Loaded state: target channel {}, refresh token {}",
                snapshot.target_channel_id.as_deref().unwrap_or("not set"),
                if snapshot.spotify_refresh_token.is_some() { "set" } else { "not set" },
            );
        }
        store
    }

    pub fn snapshot(&self) -> BotState {
        self.lock().clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().spotify_refresh_token.clone()
    }

    pub fn target_channel_id(&self) -> Option<String> {
        self.lock().target_channel_id.clone()
    }

    /// Merges `patch` into the record and writes it out before returning.
    pub fn save(&self, patch: StatePatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(id) = patch.target_channel_id {
            state.target_channel_id = id;
        }
        if let Some(token) = patch.spotify_refresh_token {
            state.spotify_refresh_token = token;
        }

        let encoded = serde_json::to_string_pretty(&*state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        info!("State saved to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
