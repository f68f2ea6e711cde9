use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use courier_store::SessionStore;

#[derive(Debug, Clone, Default)]
struct UserState {
    current_directory: Option<PathBuf>,
    browse_path: Option<String>,
}

/// Per-user chat state. The working directory is persisted so it survives
/// restarts; the browse subpath is ephemeral UI state.
pub struct UserStateRegistry {
    store: Arc<SessionStore>,
    states: Mutex<HashMap<i64, UserState>>,
}

impl UserStateRegistry {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_directory(&self, user_id: i64) -> Option<PathBuf> {
        if let Some(directory) = self
            .states
            .lock()
            .expect("states lock")
            .get(&user_id)
            .and_then(|state| state.current_directory.clone())
        {
            return Some(directory);
        }

        match self.store.current_directory(user_id) {
            Ok(Some(directory)) => {
                let directory = PathBuf::from(directory);
                self.states
                    .lock()
                    .expect("states lock")
                    .entry(user_id)
                    .or_default()
                    .current_directory = Some(directory.clone());
                Some(directory)
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(user_id, error = %error, "failed to read persisted directory");
                None
            }
        }
    }

    pub fn set_current_directory(&self, user_id: i64, directory: &PathBuf) {
        self.states
            .lock()
            .expect("states lock")
            .entry(user_id)
            .or_default()
            .current_directory = Some(directory.clone());
        if let Err(error) = self
            .store
            .set_current_directory(user_id, &directory.to_string_lossy())
        {
            tracing::warn!(user_id, error = %error, "failed to persist directory change");
        }
    }

    pub fn browse_path(&self, user_id: i64) -> Option<String> {
        self.states
            .lock()
            .expect("states lock")
            .get(&user_id)
            .and_then(|state| state.browse_path.clone())
    }

    pub fn set_browse_path(&self, user_id: i64, path: Option<String>) {
        self.states
            .lock()
            .expect("states lock")
            .entry(user_id)
            .or_default()
            .browse_path = path;
    }
}
