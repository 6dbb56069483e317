use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use api::file::FileUuid;
use api::root::RootUuid;
use common::storage::path::file_name;

// rename tracker
//
// most filesystems report a move as a delete followed by a create.  we hold
// each delete for a short window, keyed by what the content looks like, and
// a create that matches the key within the window becomes a logical move
// that preserves the file uuid.  entries that outlive the window are
// finalized as genuine deletes by the sweeper.

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct MoveKey {
    root_uuid: RootUuid,
    quick_hash: Option<String>,
    size: i64,
    is_dir: bool,
}

#[derive(Clone, Debug)]
pub struct PendingMove {
    pub file_uuid: FileUuid,
    pub old_path: String,
    pub root_uuid: RootUuid,
    pub size: i64,
    pub quick_hash: Option<String>,
    pub is_dir: bool,

    // wall-clock stamp for the database, monotonic stamp for expiry
    pub deleted_at: i64,
    tracked: Instant,
}

#[derive(Debug)]
pub struct RenameTracker {
    window: Duration,
    pending: Mutex<HashMap<MoveKey, PendingMove>>,
}

impl RenameTracker {
    pub fn new(window: Duration) -> Self {
        RenameTracker {
            window,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // at most one pending move per key; a second delete with the same shape
    // overwrites the first, which then expires as a plain delete elsewhere
    pub fn track_delete(
        &self,
        file_uuid: FileUuid,
        old_path: String,
        root_uuid: RootUuid,
        size: i64,
        quick_hash: Option<String>,
        is_dir: bool,
        deleted_at: i64,
    ) {
        let key = MoveKey {
            root_uuid,
            quick_hash: quick_hash.clone(),
            size,
            is_dir,
        };

        debug!({ file_uuid = file_uuid, old_path = old_path }, "tracking delete");

        self.pending.lock().unwrap().insert(
            key,
            PendingMove {
                file_uuid,
                old_path,
                root_uuid,
                size,
                quick_hash,
                is_dir,
                deleted_at,
                tracked: Instant::now(),
            },
        );
    }

    // atomically find-and-remove the pending move matching a create
    //
    // directories have no content hash, so their key degrades to
    // (root, size, is_dir) and we additionally require the final path
    // component to match; ambiguity expires as delete + create
    pub fn detect_create(
        &self,
        new_path: &str,
        root_uuid: RootUuid,
        size: i64,
        quick_hash: Option<&str>,
        is_dir: bool,
    ) -> Option<PendingMove> {
        let key = MoveKey {
            root_uuid,
            quick_hash: quick_hash.map(|s| s.to_owned()),
            size,
            is_dir,
        };

        let mut pending = self.pending.lock().unwrap();

        let candidate = pending.get(&key)?;

        if candidate.tracked.elapsed() > self.window {
            // expired entries belong to the sweeper
            return None;
        }

        if is_dir && file_name(&candidate.old_path) != file_name(new_path) {
            return None;
        }

        // files outside the hashing window carry no digest and correlate
        // on exact size alone, which is meaningless for empties
        if !is_dir && key.quick_hash.is_none() && size == 0 {
            return None;
        }

        pending.remove(&key)
    }

    // drain everything past the window; each entry becomes a real delete
    pub fn expired(&self) -> Vec<PendingMove> {
        let mut pending = self.pending.lock().unwrap();

        let keys: Vec<MoveKey> = pending
            .iter()
            .filter(|(_, v)| v.tracked.elapsed() > self.window)
            .map(|(k, _)| k.clone())
            .collect();

        keys.into_iter()
            .filter_map(|key| pending.remove(&key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window_ms: u64) -> RenameTracker {
        RenameTracker::new(Duration::from_millis(window_ms))
    }

    #[test]
    fn file_move_roundtrip() {
        let tracker = tracker(10_000);

        tracker.track_delete(
            42,
            "/media/Movies/Inception.mkv".to_owned(),
            1,
            1_000_000,
            Some("abc123".to_owned()),
            false,
            1_700_000_000,
        );

        // wrong hash does not match
        assert!(
            tracker
                .detect_create("/media/Movies/x.mkv", 1, 1_000_000, Some("zzz"), false)
                .is_none()
        );

        // wrong size does not match
        assert!(
            tracker
                .detect_create("/media/Movies/x.mkv", 1, 999, Some("abc123"), false)
                .is_none()
        );

        let pending = tracker
            .detect_create(
                "/media/Movies/Inception (2010).mkv",
                1,
                1_000_000,
                Some("abc123"),
                false,
            )
            .expect("matching create should find the pending move");

        assert_eq!(pending.file_uuid, 42);
        assert_eq!(pending.old_path, "/media/Movies/Inception.mkv");

        // the match consumed the entry
        assert!(tracker.is_empty());
    }

    #[test]
    fn directory_move_requires_name_match() {
        let tracker = tracker(10_000);

        tracker.track_delete(
            7,
            "/media/Shows/Breaking Bad".to_owned(),
            1,
            5_000_000,
            None,
            true,
            1_700_000_000,
        );

        // same shape, different name: ambiguous, not merged
        assert!(
            tracker
                .detect_create("/media/Shows/Other Show", 1, 5_000_000, None, true)
                .is_none()
        );

        let pending = tracker
            .detect_create("/archive/Breaking Bad", 1, 5_000_000, None, true)
            .expect("name match should merge");

        assert_eq!(pending.file_uuid, 7);
    }

    #[test]
    fn empty_files_never_match() {
        let tracker = tracker(10_000);

        tracker.track_delete(9, "/a/empty".to_owned(), 1, 0, None, false, 0);

        assert!(tracker.detect_create("/b/empty", 1, 0, None, false).is_none());

        // still there for the sweeper
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn oversize_files_match_on_exact_size() {
        let tracker = tracker(10_000);

        // above the hash ceiling there is no digest, only the byte count
        let size = 8_589_934_592;

        tracker.track_delete(11, "/a/big.iso".to_owned(), 1, size, None, false, 0);

        let pending = tracker
            .detect_create("/b/big.iso", 1, size, None, false)
            .expect("exact size should correlate");

        assert_eq!(pending.file_uuid, 11);
    }

    #[test]
    fn expiry_reaps_old_entries() {
        let tracker = tracker(10);

        tracker.track_delete(1, "/a".to_owned(), 1, 100, Some("h".to_owned()), false, 0);

        assert!(tracker.expired().is_empty());

        std::thread::sleep(Duration::from_millis(25));

        // an expired entry no longer matches a create
        assert!(
            tracker
                .detect_create("/b", 1, 100, Some("h"), false)
                .is_none()
        );

        let reaped = tracker.expired();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].file_uuid, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn second_delete_overwrites_key() {
        let tracker = tracker(10_000);

        tracker.track_delete(1, "/a".to_owned(), 1, 100, Some("h".to_owned()), false, 0);
        tracker.track_delete(2, "/b".to_owned(), 1, 100, Some("h".to_owned()), false, 0);

        assert_eq!(tracker.len(), 1);

        let pending = tracker
            .detect_create("/c", 1, 100, Some("h"), false)
            .unwrap();

        assert_eq!(pending.file_uuid, 2);
    }
}
