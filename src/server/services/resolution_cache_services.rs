use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::models::{ChannelId, ResolvedStream};

// upstream tokens are good for a bit longer than this
pub const RESOLUTION_TTL: Duration = Duration::from_secs(7 * 60);

/// memo of successful resolutions. every operation takes the same lock and the lock is only ever
/// held for the map access itself, nothing awaits while holding it
pub struct ResolutionCache {
    entries: Mutex<HashMap<ChannelId, ResolvedStream>>,
    ttl: Duration,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(RESOLUTION_TTL)
    }
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// expired entries are removed here rather than by a sweeper
    pub fn get(&self, channel_id: &str) -> Option<ResolvedStream> {
        let now = Utc::now();
        let mut entries = self.entries.lock();

        match entries.get(channel_id) {
            Some(stream) if stream.is_fresh(self.ttl, now) => Some(stream.clone()),
            Some(_) => {
                entries.remove(channel_id);
                debug!("evicted expired resolution for channel {}", channel_id);
                None
            }
            None => None,
        }
    }

    /// last write wins
    pub fn put(&self, channel_id: ChannelId, stream: ResolvedStream) {
        self.entries.lock().insert(channel_id, stream);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!("clearing {} cached resolutions", entries.len());
        entries.clear();
    }

    /// entries currently held, expired ones included until someone looks them up
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
