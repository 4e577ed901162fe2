//! The canonical store: one MVCC keyspace for every model.
//!
//! An ordered memtable maps each key to its version chain, a list of
//! `(sequence, value-or-tombstone)` pairs. Readers resolve a key against
//! a snapshot sequence number and see the newest version at or below it;
//! writers never block readers. Committed mutations are appended to the
//! durable record log before they are published to the memtable, so a
//! crash between the two is repaired by WAL replay on reopen.

mod log;

pub(crate) use log::Mutation;
use log::RecordLog;

use crate::error::EngineResult;
use crate::types::SequenceNumber;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// One page of an ordered scan.
///
/// Scans are paginated: each page carries up to `limit` live entries and,
/// when the keyspace may hold more, an opaque cursor to resume from. The
/// cursor stays valid across commits; resuming at the same snapshot sees
/// a consistent cut of the data.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Key/value pairs in key order. Tombstoned keys are skipped.
    pub items: Vec<(Vec<u8>, Arc<Vec<u8>>)>,
    /// Pass back to the next scan call to continue; `None` means done.
    pub next_cursor: Option<Vec<u8>>,
}

type VersionChain = Vec<(SequenceNumber, Option<Arc<Vec<u8>>>)>;

/// Upper bound of the key range sharing `prefix`: the smallest key above
/// every prefixed key, or unbounded for an all-`0xFF` prefix.
pub(crate) fn prefix_upper(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    loop {
        match end.last() {
            Some(&0xFF) => {
                end.pop();
            }
            Some(_) => {
                let last = end.len() - 1;
                end[last] += 1;
                break Bound::Excluded(end);
            }
            None => break Bound::Unbounded,
        }
    }
}

/// The shared keyspace.
pub(crate) struct CanonicalStore {
    memtable: RwLock<BTreeMap<Vec<u8>, VersionChain>>,
    log: Mutex<RecordLog>,
}

impl CanonicalStore {
    /// Opens the store over a record log, replaying whatever the log
    /// holds. Returns the store and the highest sequence number found.
    pub(crate) fn open(log_backend: Box<dyn facetdb_storage::StorageBackend>) -> EngineResult<(Self, SequenceNumber)> {
        let mut log = RecordLog::new(log_backend);
        let mut memtable: BTreeMap<Vec<u8>, VersionChain> = BTreeMap::new();
        let max_seq = log.replay(|seq, mutation| {
            Self::insert_version(&mut memtable, seq, mutation);
        })?;
        Ok((
            Self {
                memtable: RwLock::new(memtable),
                log: Mutex::new(log),
            },
            max_seq,
        ))
    }

    fn insert_version(
        memtable: &mut BTreeMap<Vec<u8>, VersionChain>,
        seq: SequenceNumber,
        mutation: Mutation,
    ) {
        let value = mutation.value.map(Arc::new);
        let chain = memtable.entry(mutation.key).or_default();
        match chain.last_mut() {
            // Same-sequence rewrite: the batch touched this key twice,
            // the later mutation wins.
            Some(last) if last.0 == seq => last.1 = value,
            _ => chain.push((seq, value)),
        }
    }

    /// Resolves `key` at `snapshot`.
    pub(crate) fn get(&self, key: &[u8], snapshot: SequenceNumber) -> Option<Arc<Vec<u8>>> {
        let memtable = self.memtable.read();
        let chain = memtable.get(key)?;
        Self::visible(chain, snapshot)
    }

    fn visible(chain: &VersionChain, snapshot: SequenceNumber) -> Option<Arc<Vec<u8>>> {
        chain
            .iter()
            .rev()
            .find(|(seq, _)| *seq <= snapshot)
            .and_then(|(_, value)| value.clone())
    }

    /// Scans keys starting with `prefix` at `snapshot`, resuming after
    /// `cursor` if given, yielding at most `limit` live entries.
    pub(crate) fn scan_prefix(
        &self,
        prefix: &[u8],
        snapshot: SequenceNumber,
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> ScanPage {
        self.scan_bounded(prefix.to_vec(), prefix_upper(prefix), snapshot, cursor, limit)
    }

    /// Scans `[start, end)` at `snapshot` with the same pagination rules
    /// as [`CanonicalStore::scan_prefix`].
    pub(crate) fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        snapshot: SequenceNumber,
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> ScanPage {
        self.scan_bounded(
            start.to_vec(),
            Bound::Excluded(end.to_vec()),
            snapshot,
            cursor,
            limit,
        )
    }

    /// Scans `[start, upper)` at `snapshot`; the general form behind
    /// [`CanonicalStore::scan_prefix`] and [`CanonicalStore::scan_range`].
    pub(crate) fn scan_bounded(
        &self,
        start: Vec<u8>,
        upper: Bound<Vec<u8>>,
        snapshot: SequenceNumber,
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> ScanPage {
        let lower = match cursor {
            Some(after) => Bound::Excluded(after.to_vec()),
            None => Bound::Included(start),
        };

        let memtable = self.memtable.read();
        let mut items = Vec::new();
        let mut exhausted = true;
        for (key, chain) in memtable.range((lower, upper)) {
            if items.len() == limit {
                exhausted = false;
                break;
            }
            if let Some(value) = Self::visible(chain, snapshot) {
                items.push((key.clone(), value));
            }
        }

        let next_cursor = if exhausted {
            None
        } else {
            items.last().map(|(key, _)| key.clone())
        };
        ScanPage { items, next_cursor }
    }

    /// Appends a committed batch to the record log, then publishes it to
    /// the memtable. The log write happens first: if it fails, readers
    /// never see the batch, and the already-durable WAL commit repairs
    /// the log on reopen.
    pub(crate) fn apply_committed(
        &self,
        seq: SequenceNumber,
        mutations: &[Mutation],
    ) -> EngineResult<()> {
        {
            let mut log = self.log.lock();
            for mutation in mutations {
                log.append(seq, mutation)?;
            }
            log.sync()?;
        }

        let mut memtable = self.memtable.write();
        for mutation in mutations {
            Self::insert_version(&mut memtable, seq, mutation.clone());
        }
        Ok(())
    }

    /// Drops versions shadowed below `horizon`: for each chain, only the
    /// newest version at or below the horizon can still be read by any
    /// live or future snapshot. Chains reduced to a single tombstone are
    /// removed outright.
    pub(crate) fn compact_versions(&self, horizon: SequenceNumber) {
        let mut memtable = self.memtable.write();
        memtable.retain(|_, chain| {
            let keep_from = chain
                .iter()
                .rposition(|(seq, _)| *seq <= horizon)
                .unwrap_or(0);
            if keep_from > 0 {
                chain.drain(..keep_from);
            }
            !(chain.len() == 1 && chain[0].1.is_none() && chain[0].0 <= horizon)
        });
    }

    /// Forces the record log to disk.
    pub(crate) fn sync_log(&self) -> EngineResult<()> {
        self.log.lock().sync()
    }

    /// Number of distinct keys currently materialized (live or dead).
    /// Used by stats reporting and tests.
    pub(crate) fn key_count(&self) -> usize {
        self.memtable.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_storage::InMemoryBackend;

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    fn empty_store() -> CanonicalStore {
        CanonicalStore::open(Box::new(InMemoryBackend::new())).unwrap().0
    }

    #[test]
    fn versions_resolve_against_snapshots() {
        let store = empty_store();
        store
            .apply_committed(seq(1), &[Mutation::put(b"k".to_vec(), b"v1".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(2), &[Mutation::put(b"k".to_vec(), b"v2".to_vec())])
            .unwrap();

        assert_eq!(store.get(b"k", seq(0)), None);
        assert_eq!(store.get(b"k", seq(1)).unwrap().as_slice(), b"v1");
        assert_eq!(store.get(b"k", seq(2)).unwrap().as_slice(), b"v2");
        assert_eq!(store.get(b"k", seq(99)).unwrap().as_slice(), b"v2");
    }

    #[test]
    fn tombstones_hide_keys_from_newer_snapshots_only() {
        let store = empty_store();
        store
            .apply_committed(seq(1), &[Mutation::put(b"k".to_vec(), b"v".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(2), &[Mutation::delete(b"k".to_vec())])
            .unwrap();

        assert!(store.get(b"k", seq(1)).is_some());
        assert!(store.get(b"k", seq(2)).is_none());
    }

    #[test]
    fn scan_prefix_pages_through_live_keys() {
        let store = empty_store();
        let mutations: Vec<Mutation> = (0..5)
            .map(|i| Mutation::put(format!("p:{i}").into_bytes(), vec![i]))
            .collect();
        store.apply_committed(seq(1), &mutations).unwrap();
        store
            .apply_committed(
                seq(2),
                &[
                    Mutation::delete(b"p:2".to_vec()),
                    Mutation::put(b"q:0".to_vec(), b"other".to_vec()),
                ],
            )
            .unwrap();

        let page = store.scan_prefix(b"p:", seq(2), None, 3);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].0, b"p:0");
        assert_eq!(page.items[2].0, b"p:3");
        let cursor = page.next_cursor.expect("more pages");

        let page = store.scan_prefix(b"p:", seq(2), Some(&cursor), 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].0, b"p:4");
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn scan_at_old_snapshot_ignores_later_commits() {
        let store = empty_store();
        store
            .apply_committed(seq(1), &[Mutation::put(b"p:a".to_vec(), b"1".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(2), &[Mutation::put(b"p:b".to_vec(), b"2".to_vec())])
            .unwrap();

        let page = store.scan_prefix(b"p:", seq(1), None, 10);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].0, b"p:a");
    }

    #[test]
    fn scan_range_half_open() {
        let store = empty_store();
        let mutations: Vec<Mutation> = [b"a", b"b", b"c", b"d"]
            .iter()
            .map(|k| Mutation::put(k.to_vec(), b"v".to_vec()))
            .collect();
        store.apply_committed(seq(1), &mutations).unwrap();

        let page = store.scan_range(b"b", b"d", seq(1), None, 10);
        let keys: Vec<_> = page.items.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn same_batch_rewrite_applies_last_value() {
        let store = empty_store();
        store
            .apply_committed(
                seq(1),
                &[
                    Mutation::put(b"k".to_vec(), b"first".to_vec()),
                    Mutation::put(b"k".to_vec(), b"second".to_vec()),
                ],
            )
            .unwrap();
        assert_eq!(store.get(b"k", seq(1)).unwrap().as_slice(), b"second");
    }

    #[test]
    fn reopen_replays_the_log() {
        let backend = InMemoryBackend::new();
        let bytes;
        {
            let (store, _) = CanonicalStore::open(Box::new(backend)).unwrap();
            store
                .apply_committed(seq(1), &[Mutation::put(b"k".to_vec(), b"v".to_vec())])
                .unwrap();
            store
                .apply_committed(seq(2), &[Mutation::delete(b"k".to_vec())])
                .unwrap();
            store
                .apply_committed(seq(3), &[Mutation::put(b"k2".to_vec(), b"v2".to_vec())])
                .unwrap();
            bytes = store.log.lock().raw_bytes();
        }

        let (store, max_seq) =
            CanonicalStore::open(Box::new(InMemoryBackend::from_bytes(bytes))).unwrap();
        assert_eq!(max_seq, seq(3));
        assert!(store.get(b"k", seq(3)).is_none());
        assert_eq!(store.get(b"k2", seq(3)).unwrap().as_slice(), b"v2");
        // History survives the reopen too.
        assert_eq!(store.get(b"k", seq(1)).unwrap().as_slice(), b"v");
    }

    #[test]
    fn compaction_drops_shadowed_versions() {
        let store = empty_store();
        store
            .apply_committed(seq(1), &[Mutation::put(b"k".to_vec(), b"v1".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(2), &[Mutation::put(b"k".to_vec(), b"v2".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(3), &[Mutation::delete(b"gone".to_vec())])
            .unwrap();
        store
            .apply_committed(seq(3), &[Mutation::put(b"other".to_vec(), b"x".to_vec())])
            .unwrap();

        store.compact_versions(seq(3));
        // Latest value still readable, old version gone.
        assert_eq!(store.get(b"k", seq(3)).unwrap().as_slice(), b"v2");
        assert_eq!(store.get(b"k", seq(1)), None);
        // Tombstone-only chain removed entirely.
        assert_eq!(store.key_count(), 2);
    }
}
