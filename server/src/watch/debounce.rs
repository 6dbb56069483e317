use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::{DashMap, Entry};
use tokio::sync::mpsc::Sender;
use tracing::trace;

use api::root::RootUuid;

use crate::watch::ChangeEvent;

// debounce map
//
// editors and copy tools emit bursts of events for the same path; we
// collapse each burst into a single delayed action, latest event wins.
// every insert advances a per-key generation counter and each timer
// captures the generation it was armed with: a timer whose generation has
// been superseded no-ops, which prevents the classic late-timer race
// without holding any lock during the sleep.

type Key = (RootUuid, String);

#[derive(Debug)]
struct Slot {
    generation: u64,
    event: ChangeEvent,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    slots: Arc<DashMap<Key, Slot>>,

    // events that found the delivery queue full are dropped; the next full
    // scan reconciles whatever they described
    pub dropped: Arc<AtomicI64>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            slots: Arc::new(DashMap::new()),
            dropped: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    // register an event and (re)arm the timer for its key
    pub fn submit(&self, event: ChangeEvent, sink: Sender<ChangeEvent>) {
        let key = (event.root_uuid, event.path.clone());

        let generation = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.generation += 1;
                slot.event = event;
                slot.generation
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    generation: 0,
                    event,
                });
                0
            }
        };

        let slots = self.slots.clone();
        let dropped = self.dropped.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            // only the newest timer for this key may fire; remove_if makes
            // the generation check and the removal atomic
            let Some((_, slot)) = slots.remove_if(&key, |_, slot| slot.generation == generation)
            else {
                trace!("superseded debounce timer expired");
                return;
            };

            // non-blocking enqueue: a full queue drops the event
            if sink.try_send(slot.event).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::watch::ChangeKind;

    fn event(root: RootUuid, path: &str, size: i64) -> ChangeEvent {
        ChangeEvent {
            root_uuid: root,
            path: path.to_owned(),
            kind: ChangeKind::Modified,
            is_dir: false,
            size,
            quick_hash: None,
            prior: None,
        }
    }

    #[tokio::test]
    async fn burst_collapses_to_latest() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);

        for size in 1..=5 {
            debouncer.submit(event(1, "/a.mkv", size), tx.clone());
        }

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.size, 5);

        // nothing else fires
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_fire_independently() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);

        debouncer.submit(event(1, "/a.mkv", 1), tx.clone());
        debouncer.submit(event(1, "/b.mkv", 2), tx.clone());
        debouncer.submit(event(2, "/a.mkv", 3), tx.clone());

        let mut seen = Vec::new();

        for _ in 0..3 {
            let fired = rx.recv().await.unwrap();
            seen.push((fired.root_uuid, fired.path.clone()));
        }

        seen.sort();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (1, "/a.mkv".to_owned()));
        assert_eq!(seen[1], (1, "/b.mkv".to_owned()));
        assert_eq!(seen[2], (2, "/a.mkv".to_owned()));
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let debouncer = Debouncer::new(Duration::from_millis(10));

        // capacity one, never drained
        let (tx, _rx) = tokio::sync::mpsc::channel(1);

        debouncer.submit(event(1, "/a.mkv", 1), tx.clone());
        debouncer.submit(event(1, "/b.mkv", 2), tx.clone());
        debouncer.submit(event(1, "/c.mkv", 3), tx.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // one made it into the queue, the others were dropped
        assert_eq!(debouncer.dropped.load(Ordering::Relaxed), 2);
    }
}
