//! Shared, session-tagged frame repository.
//!
//! Process-wide in-memory store of published frames, scanned by
//! subscribers, evicted on a sliding window. Generalized from the
//! teacher's `logging::LogBuffer` ring buffer (bounded, `Arc<Mutex<...>>`)
//! and `pipeline::EventPipeline` (registered-subscriber synchronous
//! dispatch in registration order).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::model::{Chunk, Frame, SessionId};
use crate::util::time_key;

/// Subscriber callback invoked synchronously, outside the repository's
/// lock, after a chunk is stored. Implementations must be short and
/// non-blocking — this mirrors the teacher's note that `EventPipeline`
/// processors must not re-enter the pipeline.
pub type FrameSubscriber = Arc<dyn Fn(&[Frame], SessionId) + Send + Sync>;

struct Inner {
    frames: HashMap<i64, Frame>,
    time_index: BTreeSet<i64>,
    session_tag: Option<SessionId>,
    schema: Option<crate::model::Schema>,
}

/// Process-wide store of published frames, tagged by session.
pub struct FrameRepository {
    inner: RwLock<Inner>,
    subscribers: RwLock<Vec<FrameSubscriber>>,
    window_size: f64,
}

impl FrameRepository {
    pub fn new(window_size: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                frames: HashMap::new(),
                time_index: BTreeSet::new(),
                session_tag: None,
                schema: None,
            }),
            subscribers: RwLock::new(Vec::new()),
            window_size,
        }
    }

    pub fn subscribe(&self, subscriber: FrameSubscriber) {
        self.subscribers.write().unwrap().push(subscriber);
    }

    /// Clear stored frames, clear schema, and install a new session tag.
    /// The only operation that shrinks the store besides eviction.
    pub fn start_new_session(&self, new_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        inner.frames.clear();
        inner.time_index.clear();
        inner.schema = None;
        inner.session_tag = Some(new_id);
    }

    pub fn install_schema(&self, schema: crate::model::Schema, session_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        if inner.session_tag == Some(session_id) {
            inner.schema = Some(schema);
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.inner.read().unwrap().session_tag
    }

    /// Store a chunk tagged with `session_id`. If `session_id` does not
    /// match the repository's current tag, the whole chunk is silently
    /// discarded (a late write from a dead session).
    pub fn store_chunk(&self, chunk: Chunk, session_id: SessionId) {
        if self.current_session() != Some(session_id) {
            return;
        }

        let mut stored_times: Vec<i64> = Vec::with_capacity(chunk.len());
        {
            let mut inner = self.inner.write().unwrap();
            // Re-check: the tag may have changed while we waited for the lock.
            if inner.session_tag != Some(session_id) {
                return;
            }

            for (key, frame) in chunk {
                inner
                    .frames
                    .entry(key)
                    .and_modify(|existing| existing.merge_from(&frame))
                    .or_insert(frame);
                inner.time_index.insert(key);
                stored_times.push(key);
            }

            if let Some(&max_key) = inner.time_index.iter().next_back() {
                let max_time = max_key as f64 / 10.0;
                let cutoff = max_time - self.window_size;
                let cutoff_key = time_key(cutoff);
                let evict: Vec<i64> = inner
                    .time_index
                    .iter()
                    .take_while(|&&k| k < cutoff_key)
                    .copied()
                    .collect();
                for key in evict {
                    inner.time_index.remove(&key);
                    inner.frames.remove(&key);
                }
            }
        }

        if stored_times.is_empty() {
            return;
        }
        stored_times.sort_unstable();
        let ordered_frames: Vec<Frame> = {
            let inner = self.inner.read().unwrap();
            stored_times
                .iter()
                .filter_map(|k| inner.frames.get(k).cloned())
                .collect()
        };

        let subscribers = self.subscribers.read().unwrap();
        for subscriber in subscribers.iter() {
            subscriber(&ordered_frames, session_id);
        }
    }

    pub fn frame_at(&self, time: f64) -> Option<Frame> {
        self.inner.read().unwrap().frames.get(&time_key(time)).cloned()
    }

    pub fn range(&self, a: f64, b: f64) -> Vec<Frame> {
        let inner = self.inner.read().unwrap();
        let (a, b) = (time_key(a), time_key(b));
        inner
            .time_index
            .range(a..=b)
            .filter_map(|k| inner.frames.get(k).cloned())
            .collect()
    }

    /// Column/attribute scan: same as `range`, extracting a named column
    /// from a named table on each frame.
    pub fn column_range(
        &self,
        a: f64,
        b: f64,
        logical_object_name: &str,
        attribute: &str,
    ) -> Vec<(f64, crate::model::Value)> {
        self.range(a, b)
            .into_iter()
            .filter_map(|frame| {
                frame
                    .tables
                    .get(logical_object_name)
                    .and_then(|row| row.get(attribute))
                    .map(|v| (frame.time, v.clone()))
            })
            .collect()
    }

    /// The N most recently published frames, re-ordered ascending by time.
    pub fn latest(&self, n: usize) -> Vec<Frame> {
        let inner = self.inner.read().unwrap();
        let mut keys: Vec<i64> = inner.time_index.iter().rev().take(n).copied().collect();
        keys.sort_unstable();
        keys.into_iter()
            .filter_map(|k| inner.frames.get(&k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
