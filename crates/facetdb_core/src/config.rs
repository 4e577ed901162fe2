//! Engine configuration.

use std::collections::BTreeMap;

/// Tunables for an engine instance.
///
/// Built with chained setters:
///
/// ```rust
/// use facetdb_core::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_sync_on_commit(false)
///     .with_scan_page_size(512);
/// assert_eq!(config.scan_page_size, 512);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fsync the WAL on every commit. Turning this off trades durability
    /// of the last few commits for write throughput.
    pub sync_on_commit: bool,
    /// Default page size for scans and index walks.
    pub scan_page_size: usize,
    /// How many recent commit footprints to retain for conflict checks
    /// beyond what active snapshots require.
    pub recent_commit_horizon: usize,
    /// Weight given to unweighted edges at creation when their type has
    /// no entry in [`EngineConfig::edge_type_weights`].
    pub default_edge_weight: f64,
    /// Per-edge-type default weights, resolved when an edge is created
    /// so the persisted edge carries its weight.
    pub edge_type_weights: BTreeMap<String, f64>,
    /// Maximum index entries probed per predicate when estimating
    /// cardinality. Estimates saturate at this value.
    pub probe_limit: usize,
    /// Pre-filter a vector query only while the structured candidate set
    /// is below this fraction of the vector index population.
    pub prefilter_max_fraction: f64,
    /// Over-fetch factor for post-filtered vector queries.
    pub vector_oversample: usize,
    /// How many times a post-filtered vector query widens its fetch
    /// before giving up on filling `k`.
    pub vector_refill_attempts: usize,
    /// Minimum candidate count before the executor fans work out to the
    /// thread pool; below it, sequential execution wins.
    pub parallel_threshold: usize,
    /// Capacity of the audit channel. Events beyond it are dropped.
    pub audit_buffer: usize,
    /// HNSW: neighbours kept per node per layer.
    pub hnsw_m: usize,
    /// HNSW: beam width while building.
    pub hnsw_ef_construction: usize,
    /// HNSW: default beam width while searching.
    pub hnsw_ef_search: usize,
    /// Shortest token the full-text tokenizer keeps.
    pub min_token_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            scan_page_size: 256,
            recent_commit_horizon: 10_000,
            default_edge_weight: 1.0,
            edge_type_weights: BTreeMap::new(),
            probe_limit: 128,
            prefilter_max_fraction: 0.05,
            vector_oversample: 4,
            vector_refill_attempts: 3,
            parallel_threshold: 256,
            audit_buffer: 1024,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            min_token_len: 2,
        }
    }
}

impl EngineConfig {
    /// Sets WAL fsync-per-commit.
    #[must_use]
    pub const fn with_sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the scan page size.
    #[must_use]
    pub const fn with_scan_page_size(mut self, value: usize) -> Self {
        self.scan_page_size = value;
        self
    }

    /// Sets the retained commit-footprint horizon.
    #[must_use]
    pub const fn with_recent_commit_horizon(mut self, value: usize) -> Self {
        self.recent_commit_horizon = value;
        self
    }

    /// Sets the weight assumed for unweighted edges.
    #[must_use]
    pub const fn with_default_edge_weight(mut self, value: f64) -> Self {
        self.default_edge_weight = value;
        self
    }

    /// Sets the default weight for unweighted edges of one type.
    #[must_use]
    pub fn with_edge_type_weight(mut self, edge_type: impl Into<String>, weight: f64) -> Self {
        self.edge_type_weights.insert(edge_type.into(), weight);
        self
    }

    /// The weight an unweighted edge of `edge_type` receives at
    /// creation.
    #[must_use]
    pub fn edge_weight_for(&self, edge_type: &str) -> f64 {
        self.edge_type_weights
            .get(edge_type)
            .copied()
            .unwrap_or(self.default_edge_weight)
    }

    /// Sets the cardinality probe limit.
    #[must_use]
    pub const fn with_probe_limit(mut self, value: usize) -> Self {
        self.probe_limit = value;
        self
    }

    /// Sets the pre-filter candidate fraction cutoff.
    #[must_use]
    pub const fn with_prefilter_max_fraction(mut self, value: f64) -> Self {
        self.prefilter_max_fraction = value;
        self
    }

    /// Sets the vector over-fetch factor.
    #[must_use]
    pub const fn with_vector_oversample(mut self, value: usize) -> Self {
        self.vector_oversample = value;
        self
    }

    /// Sets the executor's parallel fan-out threshold.
    #[must_use]
    pub const fn with_parallel_threshold(mut self, value: usize) -> Self {
        self.parallel_threshold = value;
        self
    }

    /// Sets the audit channel capacity.
    #[must_use]
    pub const fn with_audit_buffer(mut self, value: usize) -> Self {
        self.audit_buffer = value;
        self
    }

    /// Sets HNSW build parameters.
    #[must_use]
    pub const fn with_hnsw_params(mut self, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        self.hnsw_m = m;
        self.hnsw_ef_construction = ef_construction;
        self.hnsw_ef_search = ef_search;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.sync_on_commit);
        assert!(config.scan_page_size > 0);
        assert!(config.prefilter_max_fraction > 0.0 && config.prefilter_max_fraction < 1.0);
        assert!(config.hnsw_m >= 4);
    }

    #[test]
    fn builder_chains() {
        let config = EngineConfig::default()
            .with_probe_limit(10)
            .with_hnsw_params(8, 100, 32)
            .with_default_edge_weight(2.0);
        assert_eq!(config.probe_limit, 10);
        assert_eq!(config.hnsw_m, 8);
        assert_eq!(config.default_edge_weight, 2.0);
    }

    #[test]
    fn per_type_edge_weights_override_the_global_default() {
        let config = EngineConfig::default()
            .with_default_edge_weight(1.5)
            .with_edge_type_weight("follows", 2.5);
        assert_eq!(config.edge_weight_for("follows"), 2.5);
        assert_eq!(config.edge_weight_for("likes"), 1.5);
    }
}
