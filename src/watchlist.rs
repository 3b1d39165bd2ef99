use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Seat ids the local user wants a "now free" notification for.
///
/// Persisted as a JSON array of strings so it survives a restart. The file
/// is client-local state, not shared data: a missing or unreadable file just
/// means an empty list, and a failed write is logged rather than escalated.
#[derive(Debug)]
pub struct WatchList {
    ids: Vec<String>,
    path: PathBuf,
}

impl WatchList {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Vec<String>>(&data) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!("Watch-list file {:?} is corrupt, starting empty: {:?}", path, err);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        debug!("Watch-list loaded with {} entries", ids.len());
        WatchList { ids, path }
    }

    /// Add a seat id. Returns false if it was already watched; the list is
    /// only rewritten when something actually changed.
    pub fn add(&mut self, seat_id: &str) -> bool {
        if self.ids.iter().any(|id| id == seat_id) {
            return false;
        }
        self.ids.push(seat_id.to_string());
        self.persist();
        true
    }

    /// Remove a seat id, persisting the shrunken list. Returns whether the
    /// id was present.
    pub fn remove(&mut self, seat_id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| id != seat_id);
        if self.ids.len() == before {
            return false;
        }
        self.persist();
        true
    }

    pub fn contains(&self, seat_id: &str) -> bool {
        self.ids.iter().any(|id| id == seat_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    fn persist(&self) {
        match serde_json::to_string(&self.ids) {
            Ok(data) => {
                if let Err(err) = fs::write(&self.path, data) {
                    warn!("Failed to persist watch-list to {:?}: {:?}", self.path, err);
                }
            }
            Err(err) => warn!("Failed to encode watch-list: {:?}", err),
        }
    }
}
