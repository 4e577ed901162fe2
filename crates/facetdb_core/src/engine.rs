//! The engine facade.
//!
//! [`Engine`] owns the whole stack: directory lock, manifest, canonical
//! store, WAL, projection registries, and the transaction manager. Every
//! public operation goes through here.
//!
//! The commit path is the heart of it. A transaction stages entity and
//! edge operations; at commit, under the single commit lock, the engine
//! reads the state each write replaces, derives every projection mutation
//! (index, fulltext, TTL, geo, graph, vector), logs the whole batch to
//! the WAL, and only then publishes it to the store. A crash between the
//! WAL frames and the publish is repaired on reopen; a crash before the
//! `Commit` frame reached disk erases the transaction entirely.

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::dir::{DirLock, RECORDS_FILE, WAL_FILE};
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::graph::{self, Direction, Edge, Path};
use crate::index::{self, IndexDefinition, IndexKind};
use crate::keyspace;
use crate::manifest::Manifest;
use crate::query::{
    self, CancelToken, ExplainReport, ProfileReport, Query, QueryResult, StepTiming,
};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::store::{CanonicalStore, Mutation};
use crate::transaction::{
    AuditEvent, AuditLog, EdgeOp, IsolationLevel, TransactionManager, TxnState,
};
use crate::types::{EntityKey, SequenceNumber, TransactionId};
use crate::vector::{VectorIndexConfig, VectorIndexes};
use crate::wal::{WalReader, WalRecord, WalWriter};
use facetdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path as FsPath;
use std::sync::mpsc::Receiver;

/// An embedded multi-model database.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Dropping the
/// engine releases the directory lock but does not checkpoint; call
/// [`Engine::close`] for a clean shutdown.
pub struct Engine {
    ctx: EngineContext,
    /// Held for the lifetime of the engine; `None` for in-memory
    /// databases, which also have no manifest to persist.
    lock: Option<DirLock>,
}

impl Engine {
    /// Opens (creating if necessary) a database directory.
    ///
    /// Acquires an exclusive lock on the directory, loads the manifest,
    /// replays the WAL, and rebuilds the vector RAM tier from its
    /// persisted snapshots and canonical records.
    pub fn open(dir: impl AsRef<FsPath>, config: EngineConfig) -> EngineResult<Self> {
        let lock = DirLock::acquire(dir.as_ref())?;
        let manifest = Manifest::load(lock.dir())?;
        let records = FileBackend::open(&lock.dir().join(RECORDS_FILE))?;
        let wal = FileBackend::open(&lock.dir().join(WAL_FILE))?;
        let engine = Self::bootstrap(config, manifest, Box::new(records), Box::new(wal), Some(lock))?;
        tracing::info!(dir = %dir.as_ref().display(), "database open");
        Ok(engine)
    }

    /// Opens a database that lives entirely in memory. Nothing survives
    /// the engine; useful for tests and caches.
    pub fn open_in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::bootstrap(
            config,
            Manifest::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            None,
        )
    }

    fn bootstrap(
        config: EngineConfig,
        manifest: Manifest,
        records: Box<dyn StorageBackend>,
        wal_backend: Box<dyn StorageBackend>,
        lock: Option<DirLock>,
    ) -> EngineResult<Self> {
        let (store, recovered) = CanonicalStore::open(records)?;
        let mut wal = WalWriter::new(wal_backend);
        let committed = Self::recover(&mut wal, &store, recovered)?;

        let indexes = index::SecondaryIndexes::default();
        for def in manifest.indexes {
            indexes.register(def)?;
        }
        let vectors = VectorIndexes::default();
        for vector_config in manifest.vectors {
            let name = vector_config.name.clone();
            vectors.register(vector_config, config.hnsw_m, config.hnsw_ef_construction)?;
            vectors.load(&name, &store, committed, config.scan_page_size)?;
        }

        let txns = TransactionManager::new(committed, config.recent_commit_horizon);
        Ok(Self {
            ctx: EngineContext {
                config,
                stats: EngineStats::default(),
                store,
                indexes,
                vectors,
                txns,
                audit: AuditLog::default(),
                wal: Mutex::new(wal),
            },
            lock,
        })
    }

    /// Replays the WAL against the store. Only transactions whose
    /// `Commit` frame reached disk are applied, and only those newer than
    /// what the record log already holds. The WAL is reset afterwards.
    fn recover(
        wal: &mut WalWriter,
        store: &CanonicalStore,
        recovered: SequenceNumber,
    ) -> EngineResult<SequenceNumber> {
        let mut committed = recovered;
        let mut pending: HashMap<TransactionId, Vec<Mutation>> = HashMap::new();
        let mut replayed = 0usize;
        let valid_len = {
            let mut reader = WalReader::new(wal.backend())?;
            while let Some((offset, record)) = reader.next_record()? {
                match record {
                    WalRecord::Begin { txn } => {
                        pending.insert(txn, Vec::new());
                    }
                    WalRecord::Put { txn, key, value } => {
                        if let Some(muts) = pending.get_mut(&txn) {
                            muts.push(Mutation::put(key, value));
                        }
                    }
                    WalRecord::Delete { txn, key } => {
                        if let Some(muts) = pending.get_mut(&txn) {
                            muts.push(Mutation::delete(key));
                        }
                    }
                    WalRecord::Abort { txn } => {
                        pending.remove(&txn);
                    }
                    WalRecord::Commit { txn, seq } => {
                        let Some(mutations) = pending.remove(&txn) else {
                            return Err(EngineError::wal_corruption(
                                offset,
                                format!("commit of unknown transaction {txn}"),
                            ));
                        };
                        if seq > committed {
                            store.apply_committed(seq, &mutations)?;
                            committed = seq;
                            replayed += 1;
                        }
                    }
                    WalRecord::Checkpoint { .. } => {}
                }
            }
            reader.valid_len()
        };
        let total = wal.len()?;
        if valid_len < total {
            tracing::warn!(valid_len, total, "torn WAL tail discarded");
        }
        if replayed > 0 {
            tracing::info!(replayed, committed = %committed, "WAL recovery complete");
        }
        // Everything committed now lives in the record log; start the WAL
        // over rather than replaying a growing history on every open.
        store.sync_log()?;
        wal.truncate(0)?;
        Ok(committed)
    }

    // ------------------------------------------------------------------
    // Transactions

    /// Starts a transaction at the default [`IsolationLevel::Snapshot`].
    pub fn begin(&self) -> TransactionId {
        self.begin_with(IsolationLevel::default())
    }

    /// Starts a transaction at an explicit isolation level.
    pub fn begin_with(&self, isolation: IsolationLevel) -> TransactionId {
        self.ctx.stats.txn_started(1);
        self.ctx.txns.begin(isolation)
    }

    /// Stages an entity write. Replaces any earlier write to the same
    /// entity in this transaction. Nothing is visible until commit.
    pub fn put(&self, txn: TransactionId, entity: Entity) -> EngineResult<()> {
        self.ctx.txns.with_state(txn, |state| {
            state.stage_put(entity);
            Ok(())
        })
    }

    /// Stages an entity deletion. Deleting an absent entity is a no-op
    /// that still commits cleanly.
    pub fn delete(&self, txn: TransactionId, table: &str, pk: &str) -> EngineResult<()> {
        let key = EntityKey::new(table, pk);
        self.ctx.txns.with_state(txn, |state| {
            state.stage_delete(key);
            Ok(())
        })
    }

    /// Stages an edge write between two entities.
    pub fn add_edge(&self, txn: TransactionId, edge: Edge) -> EngineResult<()> {
        self.ctx.txns.with_state(txn, |state| {
            state.edge_ops.push(EdgeOp::Add(edge));
            Ok(())
        })
    }

    /// Stages the removal of an edge. The edge must carry the same
    /// endpoints and pk it was added with.
    pub fn remove_edge(&self, txn: TransactionId, edge: Edge) -> EngineResult<()> {
        self.ctx.txns.with_state(txn, |state| {
            state.edge_ops.push(EdgeOp::Remove(edge));
            Ok(())
        })
    }

    /// Reads an entity through the transaction: staged writes first, then
    /// the transaction's snapshot (or the latest committed state under
    /// [`IsolationLevel::ReadCommitted`]).
    pub fn get(&self, txn: TransactionId, table: &str, pk: &str) -> EngineResult<Option<Entity>> {
        let key = EntityKey::new(table, pk);
        let latest = self.ctx.txns.committed();
        let (staged, snapshot) = self.ctx.txns.with_state(txn, |state| {
            let staged = state.staged(&key).map(|op| op.cloned());
            let snapshot = match state.isolation {
                IsolationLevel::Snapshot => state.snapshot,
                IsolationLevel::ReadCommitted => latest,
            };
            Ok((staged, snapshot))
        })?;
        if let Some(op) = staged {
            return Ok(op);
        }
        self.read_entity(&key, snapshot)
    }

    /// Commits a transaction, returning the sequence number its writes
    /// became visible at.
    ///
    /// Under [`IsolationLevel::Snapshot`] this fails with a retryable
    /// [`EngineError::Conflict`] if another transaction committed a write
    /// to any of the same entities after this transaction began.
    pub fn commit(&self, txn: TransactionId) -> EngineResult<SequenceNumber> {
        let state = self.ctx.txns.take(txn)?;
        if state.is_read_only() {
            self.ctx.stats.txn_committed(1);
            return Ok(self.ctx.txns.committed());
        }

        let _guard = self.ctx.txns.commit_lock();
        let latest = self.ctx.txns.committed();
        let footprint = Self::footprint(&state);
        if state.isolation == IsolationLevel::Snapshot {
            if let Err(err) = self.ctx.txns.check_conflicts(txn, state.snapshot, &footprint) {
                self.ctx.stats.txn_conflicted(1);
                return Err(err);
            }
        }

        let mutations = match self.derive_mutations(&state, latest) {
            Ok(mutations) => mutations,
            Err(err) => {
                self.ctx.stats.txn_aborted(1);
                return Err(err);
            }
        };

        let seq = latest.next();
        self.append_and_publish(txn, &mutations, seq)?;
        self.ctx
            .txns
            .record_commit(seq, footprint.into_iter().collect());

        let puts = mutations.iter().filter(|m| m.value.is_some()).count();
        let deletes = mutations.len() - puts;
        let written = state.entity_ops.values().filter(|op| op.is_some()).count();
        let deleted = state.entity_ops.len() - written;
        self.ctx.stats.entity_written(written as u64);
        self.ctx.stats.entity_deleted(deleted as u64);
        self.ctx
            .stats
            .projection_written((mutations.len() - state.entity_ops.len()) as u64);
        self.ctx.stats.txn_committed(1);
        self.ctx.audit.publish(AuditEvent {
            seq,
            txn,
            puts,
            deletes,
        });
        tracing::debug!(%txn, %seq, puts, deletes, "commit");
        Ok(seq)
    }

    /// Discards a transaction and everything it staged.
    pub fn rollback(&self, txn: TransactionId) -> EngineResult<()> {
        self.ctx.txns.take(txn)?;
        self.ctx.stats.txn_aborted(1);
        Ok(())
    }

    /// Canonical keys this transaction writes, for conflict detection.
    /// Edges are tracked by their outgoing adjacency key.
    fn footprint(state: &TxnState) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = state
            .entity_ops
            .keys()
            .map(|key| keyspace::entity_key(&key.table, &key.pk))
            .collect();
        for op in &state.edge_ops {
            let edge = match op {
                EdgeOp::Add(edge) | EdgeOp::Remove(edge) => edge,
            };
            keys.push(keyspace::graph_out_key(
                &edge.from.table,
                &edge.from.pk,
                &edge.pk,
            ));
        }
        keys
    }

    /// Turns staged entity and edge operations into the full mutation
    /// batch, projections included. Old projection entries are diffed
    /// against the committed state the write replaces.
    fn derive_mutations(
        &self,
        state: &TxnState,
        latest: SequenceNumber,
    ) -> EngineResult<Vec<Mutation>> {
        let mut mutations = Vec::new();
        for (key, op) in &state.entity_ops {
            let canonical = keyspace::entity_key(&key.table, &key.pk);
            let old = match self.ctx.store.get(&canonical, latest) {
                Some(blob) => Some(Entity::from_blob(key.clone(), &blob)?),
                None => None,
            };
            let old_fields = old.as_ref().map(Entity::fields);
            let new_fields = op.as_ref().map(Entity::fields);
            match op {
                Some(entity) => mutations.push(Mutation::put(canonical, entity.to_blob())),
                None => mutations.push(Mutation::delete(canonical)),
            }
            mutations.extend(self.ctx.indexes.plan_entity_update(
                &key.table,
                &key.pk,
                old_fields,
                new_fields,
                self.ctx.config.min_token_len,
            )?);
            mutations.extend(
                self.ctx
                    .vectors
                    .plan_entity_update(&key.table, &key.pk, old_fields, new_fields)?,
            );
        }
        for op in &state.edge_ops {
            match op {
                EdgeOp::Add(edge) => {
                    // Unweighted edges take their type's configured
                    // default here, so the persisted edge carries it.
                    let mut edge = edge.clone();
                    if edge.weight.is_none() {
                        edge.weight = Some(self.ctx.config.edge_weight_for(&edge.edge_type));
                    }
                    mutations.extend(graph::plan_add_edge(&edge));
                }
                EdgeOp::Remove(edge) => mutations.extend(graph::plan_remove_edge(edge)),
            }
        }
        Ok(mutations)
    }

    /// WAL-first publication: frames to the log (synced when configured),
    /// then the store, then the in-RAM vector tier, then the watermark.
    fn append_and_publish(
        &self,
        txn: TransactionId,
        mutations: &[Mutation],
        seq: SequenceNumber,
    ) -> EngineResult<()> {
        {
            let mut wal = self.ctx.wal.lock();
            wal.append(&WalRecord::Begin { txn })?;
            for mutation in mutations {
                match &mutation.value {
                    Some(value) => wal.append(&WalRecord::Put {
                        txn,
                        key: mutation.key.clone(),
                        value: value.clone(),
                    })?,
                    None => wal.append(&WalRecord::Delete {
                        txn,
                        key: mutation.key.clone(),
                    })?,
                };
            }
            wal.append(&WalRecord::Commit { txn, seq })?;
            if self.ctx.config.sync_on_commit {
                wal.sync()?;
            }
        }
        self.ctx.store.apply_committed(seq, mutations)?;
        self.ctx.vectors.apply_committed(mutations);
        self.ctx.txns.advance_committed(seq);
        Ok(())
    }

    /// Commits a batch outside any user transaction: index backfills and
    /// teardowns, vector snapshot persistence. Same WAL path as user
    /// commits; an empty footprint, so it never conflicts anyone.
    fn commit_system(&self, mutations: Vec<Mutation>) -> EngineResult<SequenceNumber> {
        let txn = self.ctx.txns.begin(IsolationLevel::ReadCommitted);
        self.ctx.txns.take(txn)?;
        let _guard = self.ctx.txns.commit_lock();
        let seq = self.ctx.txns.committed().next();
        self.append_and_publish(txn, &mutations, seq)?;
        self.ctx.txns.record_commit(seq, HashSet::new());
        Ok(seq)
    }

    // ------------------------------------------------------------------
    // Auto-commit entity access

    /// Reads the latest committed version of an entity.
    pub fn get_entity(&self, table: &str, pk: &str) -> EngineResult<Option<Entity>> {
        self.read_entity(&EntityKey::new(table, pk), self.ctx.txns.committed())
    }

    /// Writes one entity in its own transaction.
    pub fn put_entity(&self, entity: Entity) -> EngineResult<SequenceNumber> {
        let txn = self.begin();
        self.put(txn, entity)?;
        self.commit(txn)
    }

    /// Deletes one entity in its own transaction. Returns whether it
    /// existed.
    pub fn delete_entity(&self, table: &str, pk: &str) -> EngineResult<bool> {
        if self.get_entity(table, pk)?.is_none() {
            return Ok(false);
        }
        let txn = self.begin();
        self.delete(txn, table, pk)?;
        self.commit(txn)?;
        Ok(true)
    }

    /// Pages through a table in pk order at the latest committed
    /// snapshot. Returns the entities and, when more remain, a cursor to
    /// resume from.
    pub fn scan(
        &self,
        table: &str,
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> EngineResult<(Vec<Entity>, Option<Vec<u8>>)> {
        let snapshot = self.ctx.txns.committed();
        let prefix = keyspace::table_prefix(table);
        let page = self.ctx.store.scan_prefix(&prefix, snapshot, cursor, limit);
        let mut entities = Vec::with_capacity(page.items.len());
        for (key, blob) in &page.items {
            let entity_key = keyspace::parse_entity_key(key)?;
            entities.push(Entity::from_blob(entity_key, blob)?);
        }
        Ok((entities, page.next_cursor))
    }

    fn read_entity(&self, key: &EntityKey, snapshot: SequenceNumber) -> EngineResult<Option<Entity>> {
        let canonical = keyspace::entity_key(&key.table, &key.pk);
        match self.ctx.store.get(&canonical, snapshot) {
            Some(blob) => Ok(Some(Entity::from_blob(key.clone(), &blob)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Secondary indexes

    /// Registers a secondary index and backfills it from every existing
    /// entity of its table, atomically. Fails without side effects if an
    /// existing entity violates the declared field kind.
    pub fn create_index(&self, def: IndexDefinition) -> EngineResult<()> {
        let def = self.ctx.indexes.register(def)?;
        match self.backfill_index(&def) {
            Ok(()) => {
                self.persist_manifest()?;
                tracing::info!(index = %def.name, "index created");
                Ok(())
            }
            Err(err) => {
                let _ = self.ctx.indexes.unregister(&def.name);
                Err(err)
            }
        }
    }

    fn backfill_index(&self, def: &IndexDefinition) -> EngineResult<()> {
        let snapshot = self.ctx.txns.committed();
        let min_token_len = self.ctx.config.min_token_len;
        let mut mutations = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        let prefix = keyspace::table_prefix(&def.table);
        loop {
            let page = self.ctx.store.scan_prefix(
                &prefix,
                snapshot,
                cursor.as_deref(),
                self.ctx.config.scan_page_size,
            );
            for (key, blob) in &page.items {
                let entity_key = keyspace::parse_entity_key(key)?;
                let entity = Entity::from_blob(entity_key, blob)?;
                for (entry_key, entry_value) in
                    index::entries(def, entity.pk(), entity.fields(), min_token_len)?
                {
                    mutations.push(Mutation::put(entry_key, entry_value));
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if !mutations.is_empty() {
            let count = mutations.len();
            self.commit_system(mutations)?;
            self.ctx.stats.projection_written(count as u64);
        }
        Ok(())
    }

    /// Drops a secondary index and deletes its entries.
    pub fn drop_index(&self, name: &str) -> EngineResult<()> {
        let def = self.ctx.indexes.unregister(name)?;
        let namespace = index::entry_namespace(&def);
        self.teardown_namespace(&[namespace])?;
        self.persist_manifest()?;
        tracing::info!(index = %name, "index dropped");
        Ok(())
    }

    /// Registered secondary index definitions.
    pub fn indexes(&self) -> Vec<IndexDefinition> {
        self.ctx
            .indexes
            .definitions()
            .iter()
            .map(|def| (**def).clone())
            .collect()
    }

    /// Deletes every key under the given prefixes in one batch.
    fn teardown_namespace(&self, prefixes: &[Vec<u8>]) -> EngineResult<()> {
        let snapshot = self.ctx.txns.committed();
        let mut mutations = Vec::new();
        for prefix in prefixes {
            let mut cursor: Option<Vec<u8>> = None;
            loop {
                let page = self.ctx.store.scan_prefix(
                    prefix,
                    snapshot,
                    cursor.as_deref(),
                    self.ctx.config.scan_page_size,
                );
                for (key, _) in &page.items {
                    mutations.push(Mutation::delete(key.clone()));
                }
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
        if !mutations.is_empty() {
            self.commit_system(mutations)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vector indexes

    /// Registers a vector index and backfills it from every existing
    /// entity of its table that carries the embedding field.
    pub fn create_vector_index(&self, config: VectorIndexConfig) -> EngineResult<()> {
        let name = config.name.clone();
        self.ctx.vectors.register(
            config,
            self.ctx.config.hnsw_m,
            self.ctx.config.hnsw_ef_construction,
        )?;
        match self.backfill_vector_index(&name) {
            Ok(()) => {
                self.persist_manifest()?;
                tracing::info!(index = %name, "vector index created");
                Ok(())
            }
            Err(err) => {
                let _ = self.ctx.vectors.unregister(&name);
                Err(err)
            }
        }
    }

    fn backfill_vector_index(&self, name: &str) -> EngineResult<()> {
        let state = self.ctx.vectors.get(name)?;
        let snapshot = self.ctx.txns.committed();
        let record_prefix = keyspace::vector_prefix(name);
        let table_prefix = keyspace::table_prefix(&state.config.table);
        let mut mutations = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let page = self.ctx.store.scan_prefix(
                &table_prefix,
                snapshot,
                cursor.as_deref(),
                self.ctx.config.scan_page_size,
            );
            for (key, blob) in &page.items {
                let entity_key = keyspace::parse_entity_key(key)?;
                let entity = Entity::from_blob(entity_key, blob)?;
                let planned = self.ctx.vectors.plan_entity_update(
                    entity.table(),
                    entity.pk(),
                    None,
                    Some(entity.fields()),
                )?;
                // Sibling vector indexes on the same table already hold
                // their records; keep only the new index's.
                mutations.extend(
                    planned
                        .into_iter()
                        .filter(|m| m.key.starts_with(&record_prefix)),
                );
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if !mutations.is_empty() {
            self.commit_system(mutations)?;
        }
        Ok(())
    }

    /// Drops a vector index, its canonical records, and its persisted
    /// snapshot.
    pub fn drop_vector_index(&self, name: &str) -> EngineResult<()> {
        self.ctx.vectors.unregister(name)?;
        self.teardown_namespace(&[keyspace::vector_prefix(name), keyspace::vector_meta_key(name)])?;
        self.persist_manifest()?;
        tracing::info!(index = %name, "vector index dropped");
        Ok(())
    }

    /// Approximate nearest-neighbour search over a vector index, at the
    /// engine's configured beam width. Returns `(pk, distance)` pairs,
    /// nearest first.
    pub fn vector_search(
        &self,
        index: &str,
        query: &[f32],
        k: usize,
    ) -> EngineResult<Vec<(String, f32)>> {
        let ef = self.ctx.config.hnsw_ef_search.max(k);
        let hits = self.ctx.vectors.search(index, query, k, ef, None)?;
        self.ctx.stats.vector_search(1);
        Ok(hits)
    }

    /// Registered vector index configurations.
    pub fn vector_indexes(&self) -> Vec<VectorIndexConfig> {
        self.ctx.vectors.configs()
    }

    // ------------------------------------------------------------------
    // Graph traversal

    /// Edges incident to a node, in edge-pk order, optionally restricted
    /// to one edge type. Reads the latest committed snapshot.
    pub fn neighbors(
        &self,
        node: &EntityKey,
        direction: Direction,
        edge_type: Option<&str>,
    ) -> EngineResult<Vec<Edge>> {
        graph::neighbors(
            &self.ctx.store,
            self.ctx.txns.committed(),
            node,
            direction,
            edge_type,
            self.ctx.config.scan_page_size,
        )
    }

    /// Breadth-first traversal up to `depth` hops from `start`. Depth 0
    /// returns just the start node. Nodes appear once, in discovery
    /// order.
    pub fn traverse(
        &self,
        start: &EntityKey,
        depth: usize,
        direction: Direction,
        edge_type: Option<&str>,
    ) -> EngineResult<Vec<EntityKey>> {
        let keys = graph::bfs(
            &self.ctx.store,
            self.ctx.txns.committed(),
            start,
            depth,
            direction,
            edge_type,
            self.ctx.config.scan_page_size,
        )?;
        self.ctx.stats.traversal(1);
        Ok(keys)
    }

    /// Cheapest path between two nodes by edge weight (Dijkstra over
    /// outgoing edges). Unweighted edges cost the configured default.
    /// `None` when no path exists.
    pub fn shortest_path(
        &self,
        from: &EntityKey,
        to: &EntityKey,
        edge_type: Option<&str>,
    ) -> EngineResult<Option<Path>> {
        let path = graph::shortest_path(
            &self.ctx.store,
            self.ctx.txns.committed(),
            from,
            to,
            edge_type,
            self.ctx.config.default_edge_weight,
            self.ctx.config.scan_page_size,
        )?;
        self.ctx.stats.traversal(1);
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Queries

    /// Plans and executes a query at the latest committed snapshot.
    pub fn query(&self, query: Query) -> EngineResult<QueryResult> {
        self.query_with_cancel(query, &CancelToken::new())
    }

    /// Like [`Engine::query`], but checks the token between pipeline
    /// steps and fails with an `Execution` error once cancelled.
    pub fn query_with_cancel(
        &self,
        query: Query,
        cancel: &CancelToken,
    ) -> EngineResult<QueryResult> {
        let snapshot = self.ctx.txns.committed();
        let plan = query::plan(&self.ctx, snapshot, query)?;
        query::execute(&self.ctx, snapshot, &plan, cancel, None)
    }

    /// Plans a query and reports the chosen pipeline without executing
    /// it.
    pub fn explain(&self, query: Query) -> EngineResult<ExplainReport> {
        let snapshot = self.ctx.txns.committed();
        let plan = query::plan(&self.ctx, snapshot, query)?;
        Ok(plan.explain())
    }

    /// Executes a query and reports per-step timings alongside the
    /// result.
    pub fn profile(&self, query: Query) -> EngineResult<ProfileReport> {
        let snapshot = self.ctx.txns.committed();
        let plan = query::plan(&self.ctx, snapshot, query)?;
        let mut timings: Vec<StepTiming> = Vec::new();
        let result = query::execute(
            &self.ctx,
            snapshot,
            &plan,
            &CancelToken::new(),
            Some(&mut timings),
        )?;
        Ok(ProfileReport {
            plan: plan.explain(),
            timings,
            result,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance

    /// Deletes every entity whose TTL field, per the named TTL index, is
    /// at or before `now` (Unix seconds). Deletions run in one
    /// transaction, so their projections unwind atomically. Returns the
    /// number of entities expired.
    pub fn sweep_ttl(&self, index: &str, now: i64) -> EngineResult<usize> {
        let def = self.ctx.indexes.get(index)?;
        if def.kind != IndexKind::Ttl {
            return Err(EngineError::invalid_operation(format!(
                "index {index:?} is not a TTL index"
            )));
        }
        let pks = self.ctx.indexes.expired(
            &self.ctx.store,
            self.ctx.txns.committed(),
            &def,
            now,
            self.ctx.config.scan_page_size,
        )?;
        if pks.is_empty() {
            return Ok(0);
        }
        let txn = self.begin();
        for pk in &pks {
            self.delete(txn, &def.table, pk)?;
        }
        self.commit(txn)?;
        self.ctx.stats.ttl_expired(pks.len() as u64);
        tracing::debug!(index = %index, expired = pks.len(), "TTL sweep");
        Ok(pks.len())
    }

    /// Subscribes to commit notifications. The feed is bounded by the
    /// configured buffer and lossy: events for a full buffer are dropped
    /// rather than blocking commits. Resubscribing replaces any earlier
    /// subscriber.
    pub fn subscribe_audit(&self) -> Receiver<AuditEvent> {
        self.ctx.audit.subscribe(self.ctx.config.audit_buffer)
    }

    /// Persists vector index snapshots, fsyncs the record log, resets
    /// the WAL, and drops entity versions no active transaction can
    /// still see.
    pub fn checkpoint(&self) -> EngineResult<()> {
        let persist = self.ctx.vectors.plan_persist();
        if !persist.is_empty() {
            self.commit_system(persist)?;
        }
        let _guard = self.ctx.txns.commit_lock();
        self.ctx.store.sync_log()?;
        self.ctx.wal.lock().truncate(0)?;
        let horizon = self
            .ctx
            .txns
            .min_active_snapshot()
            .unwrap_or_else(|| self.ctx.txns.committed());
        self.ctx.store.compact_versions(horizon);
        tracing::debug!("checkpoint complete");
        Ok(())
    }

    /// Checkpoints and shuts down cleanly, releasing the directory lock.
    pub fn close(self) -> EngineResult<()> {
        self.checkpoint()?;
        self.persist_manifest()?;
        Ok(())
    }

    /// A point-in-time copy of the engine's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// The configuration this engine was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    fn persist_manifest(&self) -> EngineResult<()> {
        let Some(lock) = &self.lock else {
            return Ok(());
        };
        let manifest = Manifest {
            indexes: self
                .ctx
                .indexes
                .definitions()
                .iter()
                .map(|def| (**def).clone())
                .collect(),
            vectors: self.ctx.vectors.configs(),
        };
        manifest.save(lock.dir())
    }
}
