//! HNSW vector index over entry embeddings
//!
//! USearch index with cosine metric, keyed by entry id. The index is
//! in-process state rebuilt from the embeddings table at open; retired and
//! superseded rows stay in the index and are filtered at query time.

use std::collections::HashMap;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

// ============================================================================
// CONSTANTS
// ============================================================================

/// HNSW connectivity parameter (higher = better recall, more memory)
pub const DEFAULT_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
pub const DEFAULT_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector search error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {0}, got {1}")]
    InvalidDimensions(usize, usize),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl VectorIndexConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub memory_bytes: usize,
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// HNSW vector index keyed by entry id
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("config", &self.config)
            .field("key_to_id", &self.key_to_id)
            .field("id_to_key", &self.id_to_key)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Result<Self, VectorSearchError> {
        Self::with_config(VectorIndexConfig::with_dimensions(dimensions))
    }

    pub fn with_config(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::I8,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self {
            index,
            config,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// usearch requires reserve() before add() to avoid segfaults
    fn reserve(&self, capacity: usize) -> Result<(), VectorSearchError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorSearchError::IndexCreation(format!("failed to reserve capacity: {e}")))
    }

    /// Add or replace the vector for an entry id
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                vector.len(),
            ));
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.reserve(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index
            .add(id, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;

        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());

        Ok(())
    }

    /// Remove a vector by entry id
    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// Drop everything (used by db reset / rebuild-index)
    pub fn clear(&mut self) -> Result<(), VectorSearchError> {
        *self = Self::with_config(self.config.clone())?;
        Ok(())
    }

    /// Top-k search; returns (entry id, cosine similarity) pairs
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                query.len(),
            ));
        }

        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut search_results = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                // Cosine distance -> similarity
                let score = 1.0 - distance;
                search_results.push((string_key.clone(), score));
            }
        }

        Ok(search_results)
    }

    /// Top-k search filtered by minimum cosine similarity
    pub fn search_with_threshold(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        let results = self.search(query, limit)?;
        Ok(results
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .collect())
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            memory_bytes: self.index.serialized_length(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: usize = 32;

    fn create_test_vector(seed: f32) -> Vec<f32> {
        (0..DIMS).map(|i| ((i as f32 + seed) / DIMS as f32).sin()).collect()
    }

    #[test]
    fn test_index_creation() {
        let index = VectorIndex::new(DIMS).unwrap();
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), DIMS);
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new(DIMS).unwrap();

        index.add("entry-1", &create_test_vector(1.0)).unwrap();
        index.add("entry-2", &create_test_vector(2.0)).unwrap();
        index.add("entry-3", &create_test_vector(100.0)).unwrap();

        assert_eq!(index.len(), 3);
        assert!(index.contains("entry-1"));
        assert!(!index.contains("entry-999"));

        let results = index.search(&create_test_vector(1.0), 3).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "entry-1");
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("entry-1", &create_test_vector(1.0)).unwrap();
        assert!(index.remove("entry-1").unwrap());
        assert!(!index.contains("entry-1"));
        assert!(!index.remove("entry-1").unwrap());
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("entry-1", &create_test_vector(1.0)).unwrap();
        index.add("entry-1", &create_test_vector(2.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let wrong_size: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert!(index.add("entry-1", &wrong_size).is_err());
        assert!(index.search(&wrong_size, 5).is_err());
    }

    #[test]
    fn test_search_with_threshold() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("similar", &create_test_vector(1.0)).unwrap();
        index.add("different", &create_test_vector(100.0)).unwrap();

        let results = index
            .search_with_threshold(&create_test_vector(1.0), 10, 0.9)
            .unwrap();
        assert!(results.iter().any(|(k, _)| k == "similar"));
    }

    #[test]
    fn test_clear() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("entry-1", &create_test_vector(1.0)).unwrap();
        index.clear().unwrap();
        assert!(index.is_empty());
        assert!(!index.contains("entry-1"));
    }
}
