//! IVF-PQ (inverted file + product quantization) index — spec.md §4.7.
//!
//! Two-stage coarse-then-fine search: `nprobe` coarse centroids are probed,
//! and within each probed inverted list, candidate vectors are scored via a
//! lookup table of precomputed per-subspace partial distances rather than
//! decoding the PQ codes back to floats. Unlike the other backends, IVF-PQ
//! requires an explicit [`IvfPqIndex::train`] call before it can accept
//! inserts or answer queries.

mod kmeans;

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{candidate_is_admissible, IndexKind, VectorIndex};
use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
    pub nbits: u32,
    pub train_iters: usize,
    pub nprobe: usize,
    pub rerank_top: usize,
    /// Normalize vectors to unit norm on insert/query and score via inner
    /// product, per spec.md §4.7's cosine mode.
    pub cosine: bool,
}

impl Default for IvfPqParams {
    fn default() -> Self {
        Self {
            nlist: 256,
            m: 8,
            nbits: 8,
            train_iters: 15,
            nprobe: 16,
            rerank_top: 32,
            cosine: false,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct InvertedEntry {
    slot_id: u64,
    code: Vec<u8>,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct IvfPqIndex {
    metric: DistanceKind,
    dimension: usize,
    params: IvfPqParams,
    sub_dim: usize,
    codes_per_subspace: usize,
    coarse_centroids: Vec<Vec<f32>>,
    /// `pq_codebooks[subspace][code]` is a `sub_dim`-long centroid.
    pq_codebooks: Vec<Vec<Vec<f32>>>,
    inverted_lists: Vec<Vec<InvertedEntry>>,
    slot_to_list: FxHashMap<u64, usize>,
    trained: bool,
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

impl IvfPqIndex {
    pub fn new(dimension: usize, metric: DistanceKind, params: IvfPqParams) -> Result<Self> {
        if params.m == 0 || dimension % params.m != 0 {
            return Err(GigaError::Config(format!(
                "dimension {dimension} must be divisible by m={}",
                params.m
            )));
        }
        if params.nbits == 0 || params.nbits > 8 {
            return Err(GigaError::Config("nbits must be in 1..=8".into()));
        }
        let sub_dim = dimension / params.m;
        let codes_per_subspace = 1usize << params.nbits;
        Ok(Self {
            metric,
            dimension,
            params,
            sub_dim,
            codes_per_subspace,
            coarse_centroids: Vec::new(),
            pq_codebooks: Vec::new(),
            inverted_lists: Vec::new(),
            slot_to_list: FxHashMap::default(),
            trained: false,
        })
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// `knn` with per-call `nprobe`/`rerank_top` overrides, per spec.md §6's
    /// `knn_ivfpq` operation. `nprobe == 0` falls back to the index's
    /// configured default; `rerank_top == 0` is a valid override meaning
    /// "skip rerank", per spec.md §4.7.
    pub fn knn_with_overrides(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        rerank_top: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.require_trained()?;
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        self.check_dimension(query)?;
        let nprobe = if nprobe == 0 { self.params.nprobe } else { nprobe };
        let q = self.maybe_normalize(query);
        let approx = self.approximate_candidates(&q, nprobe);
        let mut results = self.final_results(query, approx, rerank_top, store, filter);
        results.sort();
        results.truncate(k);
        Ok(results)
    }

    fn maybe_normalize(&self, v: &[f32]) -> Vec<f32> {
        if self.params.cosine {
            normalize(v)
        } else {
            v.to_vec()
        }
    }

    fn residual(&self, v: &[f32], centroid: &[f32]) -> Vec<f32> {
        v.iter().zip(centroid.iter()).map(|(a, b)| a - b).collect()
    }

    fn encode_residual(&self, residual: &[f32]) -> Vec<u8> {
        (0..self.params.m)
            .map(|j| {
                let slice = &residual[j * self.sub_dim..(j + 1) * self.sub_dim];
                kmeans::nearest_centroid(slice, &self.pq_codebooks[j]) as u8
            })
            .collect()
    }

    /// Trains the coarse quantizer and per-subspace PQ codebooks on
    /// `training_matrix` (every row must have `dimension` entries).
    pub fn train(&mut self, training_matrix: &[Vec<f32>]) -> Result<()> {
        if training_matrix.is_empty() {
            return Err(GigaError::InvalidArgument("training matrix must be non-empty".into()));
        }
        for row in training_matrix {
            if row.len() != self.dimension {
                return Err(GigaError::DimensionMismatch {
                    expected: self.dimension,
                    actual: row.len(),
                });
            }
        }

        let normalized: Vec<Vec<f32>> = training_matrix.iter().map(|v| self.maybe_normalize(v)).collect();
        let refs: Vec<&[f32]> = normalized.iter().map(|v| v.as_slice()).collect();
        self.coarse_centroids = kmeans::kmeans(&refs, self.params.nlist.max(1), self.params.train_iters);

        let mut residuals_per_subspace: Vec<Vec<Vec<f32>>> = vec![Vec::new(); self.params.m];
        for v in &normalized {
            let list = kmeans::nearest_centroid(v, &self.coarse_centroids);
            let residual = self.residual(v, &self.coarse_centroids[list]);
            for j in 0..self.params.m {
                residuals_per_subspace[j].push(residual[j * self.sub_dim..(j + 1) * self.sub_dim].to_vec());
            }
        }

        self.pq_codebooks = residuals_per_subspace
            .iter()
            .map(|slices| {
                let refs: Vec<&[f32]> = slices.iter().map(|v| v.as_slice()).collect();
                kmeans::kmeans(&refs, self.codes_per_subspace, self.params.train_iters)
            })
            .collect();

        self.inverted_lists = vec![Vec::new(); self.coarse_centroids.len()];
        self.trained = true;
        Ok(())
    }

    fn require_trained(&self) -> Result<()> {
        if self.trained {
            Ok(())
        } else {
            Err(GigaError::NotTrained)
        }
    }

    fn check_dimension(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dimension {
            return Err(GigaError::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Builds an `m x codes_per_subspace` lookup table of partial distances
    /// between `residual_q`'s subspace slices and each codebook entry.
    fn build_lut(&self, residual_q: &[f32]) -> Vec<Vec<f32>> {
        (0..self.params.m)
            .map(|j| {
                let slice = &residual_q[j * self.sub_dim..(j + 1) * self.sub_dim];
                self.pq_codebooks[j]
                    .iter()
                    .map(|codeword| {
                        if self.params.cosine {
                            -slice.iter().zip(codeword.iter()).map(|(a, b)| a * b).sum::<f32>()
                        } else {
                            slice
                                .iter()
                                .zip(codeword.iter())
                                .map(|(a, b)| (a - b) * (a - b))
                                .sum::<f32>()
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn lut_distance(&self, lut: &[Vec<f32>], code: &[u8]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(j, &c)| lut[j][c as usize])
            .sum()
    }

    fn probe_lists(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = self
            .coarse_centroids
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let d: f32 = query.iter().zip(c.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                (d, i)
            })
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        scored
            .into_iter()
            .take(nprobe.max(1))
            .map(|(_, i)| i)
            .collect()
    }

    fn approximate_candidates(&self, query: &[f32], nprobe: usize) -> Vec<(f32, u64)> {
        let mut out = Vec::new();
        for &list in &self.probe_lists(query, nprobe) {
            let residual_q = self.residual(query, &self.coarse_centroids[list]);
            let lut = self.build_lut(&residual_q);
            for entry in &self.inverted_lists[list] {
                let d = self.lut_distance(&lut, &entry.code);
                out.push((d, entry.slot_id));
            }
        }
        out
    }

    fn final_results(
        &self,
        query: &[f32],
        mut approx: Vec<(f32, u64)>,
        rerank_top: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Vec<SearchResult> {
        approx.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let rerank_n = if rerank_top > 0 { rerank_top.min(approx.len()) } else { 0 };

        let mut results = Vec::new();
        for (i, &(approx_dist, slot_id)) in approx.iter().enumerate() {
            if !candidate_is_admissible(store, slot_id, filter) {
                continue;
            }
            let Ok(vector) = store.get(slot_id) else {
                continue;
            };
            let distance = if i < rerank_n {
                self.metric.distance(query, &vector)
            } else if self.params.cosine {
                // `approx_dist` is already a LUT-summed negative dot
                // product (spec.md §4.7's cosine mode), not a squared
                // Euclidean residual, so it needs no square root.
                approx_dist
            } else {
                approx_dist.sqrt()
            };
            let metadata = store.get_metadata(slot_id).cloned().unwrap_or_default();
            results.push(SearchResult {
                slot_id,
                distance,
                vector,
                metadata,
            });
        }
        results
    }
}

impl VectorIndex for IvfPqIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::IvfPq
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn insert(&mut self, slot_id: u64, vector: &[f32], _store: &VectorStore) -> Result<()> {
        self.require_trained()?;
        self.check_dimension(vector)?;
        let v = self.maybe_normalize(vector);
        let list = kmeans::nearest_centroid(&v, &self.coarse_centroids);
        let residual = self.residual(&v, &self.coarse_centroids[list]);
        let code = self.encode_residual(&residual);
        self.inverted_lists[list].push(InvertedEntry { slot_id, code });
        self.slot_to_list.insert(slot_id, list);
        Ok(())
    }

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        for list in &mut self.inverted_lists {
            list.retain_mut(|entry| {
                if let Some(&new_id) = mapping.get(&entry.slot_id) {
                    entry.slot_id = new_id;
                    true
                } else {
                    false
                }
            });
        }
        self.slot_to_list = self
            .slot_to_list
            .iter()
            .filter_map(|(id, &list)| mapping.get(id).map(|&new_id| (new_id, list)))
            .collect();
    }

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.require_trained()?;
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        self.check_dimension(query)?;
        let q = self.maybe_normalize(query);
        let approx = self.approximate_candidates(&q, self.params.nprobe);
        let mut results = self.final_results(query, approx, self.params.rerank_top, store, filter);
        results.sort();
        results.truncate(k);
        Ok(results)
    }

    fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.require_trained()?;
        self.check_dimension(query)?;
        let q = self.maybe_normalize(query);
        let approx = self.approximate_candidates(&q, self.params.nprobe);
        let mut results: Vec<SearchResult> = self
            .final_results(query, approx, self.params.rerank_top, store, filter)
            .into_iter()
            .filter(|r| r.distance <= radius)
            .collect();
        results.sort();
        results.truncate(max_results);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.inverted_lists.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Metadata;

    fn training_set(dim: usize) -> Vec<Vec<f32>> {
        (0..256)
            .map(|i| (0..dim).map(|j| ((i * dim + j) as f32 * 0.013).sin()).collect())
            .collect()
    }

    #[test]
    fn insert_before_train_is_not_trained() {
        let mut idx = IvfPqIndex::new(8, DistanceKind::Euclidean, IvfPqParams::default()).unwrap();
        let store = VectorStore::new_in_memory(8, None);
        assert!(matches!(
            idx.insert(0, &[0.0; 8], &store),
            Err(GigaError::NotTrained)
        ));
    }

    #[test]
    fn dimension_mismatch_on_train() {
        let mut idx = IvfPqIndex::new(8, DistanceKind::Euclidean, IvfPqParams::default()).unwrap();
        let bad = vec![vec![0.0; 4]];
        assert!(matches!(
            idx.train(&bad),
            Err(GigaError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn train_insert_search_roundtrip() {
        let dim = 16;
        let params = IvfPqParams {
            nlist: 8,
            m: 4,
            nbits: 4,
            train_iters: 5,
            nprobe: 4,
            rerank_top: 8,
            cosine: false,
        };
        let mut idx = IvfPqIndex::new(dim, DistanceKind::Euclidean, params).unwrap();
        idx.train(&training_set(dim)).unwrap();

        let mut store = VectorStore::new_in_memory(dim, None);
        let mut ids = Vec::new();
        for i in 0..100u32 {
            let v: Vec<f32> = (0..dim).map(|j| (i as f32 + j as f32 * 0.01).cos()).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            idx.insert(id, &v, &store).unwrap();
            ids.push(id);
        }
        assert_eq!(idx.len(), 100);

        let query = store.get(ids[42]).unwrap();
        let results = idx.knn(&query, 5, &store, None).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].slot_id, ids[42]);
    }

    #[test]
    fn cosine_mode_without_rerank_produces_finite_distances() {
        let dim = 16;
        let params = IvfPqParams {
            nlist: 8,
            m: 4,
            nbits: 4,
            train_iters: 5,
            nprobe: 4,
            rerank_top: 0,
            cosine: true,
        };
        let mut idx = IvfPqIndex::new(dim, DistanceKind::Cosine, params).unwrap();
        idx.train(&training_set(dim)).unwrap();

        let mut store = VectorStore::new_in_memory(dim, None);
        let mut ids = Vec::new();
        for i in 0..50u32 {
            let v: Vec<f32> = (0..dim).map(|j| (i as f32 + j as f32 * 0.01).cos()).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            idx.insert(id, &v, &store).unwrap();
            ids.push(id);
        }

        let query = store.get(ids[10]).unwrap();
        let results = idx.knn(&query, 5, &store, None).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.distance.is_finite()));
    }

    #[test]
    fn invalid_m_rejected() {
        let params = IvfPqParams {
            m: 3,
            ..IvfPqParams::default()
        };
        assert!(IvfPqIndex::new(10, DistanceKind::Euclidean, params).is_err());
    }
}
