use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::storage::FileEntry;
use crate::storage::path::{is_within, parent};

// offline cache
//
// memoizes directory listings and file-info responses for a short ttl, and
// keeps them around for a longer staleness window so that a backend outage
// can be papered over with possibly-outdated answers.  writes never read
// from here; they invalidate instead.

#[derive(Clone, Debug)]
enum Payload {
    Listing(Vec<FileEntry>),
    Info(FileEntry),
}

#[derive(Clone, Debug)]
struct CacheEntry {
    stored: Instant,
    payload: Payload,
}

#[derive(Debug)]
pub struct OfflineCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    stale_window: Duration,
}

fn listing_key(path: &str) -> String {
    format!("ls:{path}")
}

fn info_key(path: &str) -> String {
    format!("st:{path}")
}

impl OfflineCache {
    pub fn new(ttl: Duration, stale_window: Duration) -> Self {
        OfflineCache {
            entries: DashMap::new(),
            ttl,
            stale_window,
        }
    }

    pub fn store_listing(&self, path: &str, entries: &[FileEntry]) {
        self.entries.insert(
            listing_key(path),
            CacheEntry {
                stored: Instant::now(),
                payload: Payload::Listing(entries.to_vec()),
            },
        );
    }

    pub fn store_info(&self, path: &str, entry: &FileEntry) {
        self.entries.insert(
            info_key(path),
            CacheEntry {
                stored: Instant::now(),
                payload: Payload::Info(entry.clone()),
            },
        );
    }

    fn lookup(&self, key: &str, window: Duration) -> Option<Payload> {
        let entry = self.entries.get(key)?;

        if entry.stored.elapsed() > window {
            return None;
        }

        Some(entry.payload.clone())
    }

    // fresh lookups serve the memoization role within the ttl
    pub fn fresh_listing(&self, path: &str) -> Option<Vec<FileEntry>> {
        match self.lookup(&listing_key(path), self.ttl) {
            Some(Payload::Listing(entries)) => Some(entries),
            _ => None,
        }
    }

    pub fn fresh_info(&self, path: &str) -> Option<FileEntry> {
        match self.lookup(&info_key(path), self.ttl) {
            Some(Payload::Info(entry)) => Some(entry),
            _ => None,
        }
    }

    // stale lookups are only consulted after a transport failure
    pub fn stale_listing(&self, path: &str) -> Option<Vec<FileEntry>> {
        match self.lookup(&listing_key(path), self.stale_window) {
            Some(Payload::Listing(entries)) => Some(entries),
            _ => None,
        }
    }

    pub fn stale_info(&self, path: &str) -> Option<FileEntry> {
        match self.lookup(&info_key(path), self.stale_window) {
            Some(Payload::Info(entry)) => Some(entry),
            _ => None,
        }
    }

    // drop everything a write to this path could have made wrong: the entry
    // itself, anything underneath it, and the parent listing
    pub fn invalidate(&self, path: &str) {
        let parent_listing = parent(path).map(|p| listing_key(&p));

        self.entries.retain(|key, _| {
            let cached_path = match key.split_once(':') {
                Some((_, p)) => p,
                None => return false,
            };

            if is_within(path, cached_path) {
                return false;
            }

            if let Some(parent_key) = &parent_listing {
                if key == parent_key {
                    return false;
                }
            }

            true
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            name: crate::storage::path::file_name(path).to_owned(),
            path: path.to_owned(),
            size: 1,
            modified: None,
            created: None,
            is_dir: false,
            permissions: None,
            mime_hint: None,
        }
    }

    #[test]
    fn fresh_within_ttl_stale_within_window() {
        let cache = OfflineCache::new(Duration::from_millis(0), Duration::from_secs(60));

        cache.store_listing("/media", &[entry("/media/a.mkv")]);

        // ttl of zero: immediately not fresh, but still recoverable
        assert!(cache.fresh_listing("/media").is_none());
        assert_eq!(cache.stale_listing("/media").unwrap().len(), 1);
    }

    #[test]
    fn expired_beyond_stale_window() {
        let cache = OfflineCache::new(Duration::from_millis(0), Duration::from_millis(0));

        cache.store_info("/media/a.mkv", &entry("/media/a.mkv"));

        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.fresh_info("/media/a.mkv").is_none());
        assert!(cache.stale_info("/media/a.mkv").is_none());
    }

    #[test]
    fn writes_invalidate_subtree_and_parent_listing() {
        let cache = OfflineCache::new(Duration::from_secs(60), Duration::from_secs(600));

        cache.store_listing("/media", &[entry("/media/a.mkv")]);
        cache.store_listing("/media/sub", &[entry("/media/sub/b.mkv")]);
        cache.store_info("/media/sub/b.mkv", &entry("/media/sub/b.mkv"));
        cache.store_listing("/other", &[]);

        cache.invalidate("/media/sub");

        // the subtree and the parent listing are gone
        assert!(cache.stale_listing("/media/sub").is_none());
        assert!(cache.stale_info("/media/sub/b.mkv").is_none());
        assert!(cache.stale_listing("/media").is_none());

        // unrelated entries survive
        assert!(cache.fresh_listing("/other").is_some());
    }
}
