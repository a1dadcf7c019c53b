//! Lloyd's-algorithm k-means, used both for IVF-PQ's coarse quantizer and
//! its per-subspace product-quantization codebooks.
//!
//! Training runs offline (via [`crate::index::ivfpq::IvfPqIndex::train`]),
//! not on the query path, so the per-vector assignment step — the bulk of
//! each iteration's cost — fans out across `rayon`'s global pool. This is
//! the crate's only internal use of worker-pool parallelism; query
//! execution never spawns threads (spec.md §5).

use rayon::prelude::*;

/// Runs `iters` Lloyd iterations over `vectors` (each of uniform length)
/// starting from `k` centroids seeded by the first `k` distinct input
/// vectors (deterministic, no external randomness needed). Returns `k`
/// centroids; if `vectors.len() < k`, short vectors are padded by cycling
/// through the input so every centroid still gets a seed.
#[must_use]
pub fn kmeans(vectors: &[&[f32]], k: usize, iters: usize) -> Vec<Vec<f32>> {
    assert!(k > 0, "kmeans requires k > 0");
    let dim = vectors.first().map_or(0, |v| v.len());
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| vectors[i % vectors.len().max(1)].to_vec())
        .collect();

    for _ in 0..iters {
        let (sums, counts) = vectors
            .par_iter()
            .fold(
                || (vec![vec![0.0f32; dim]; k], vec![0usize; k]),
                |(mut sums, mut counts), v| {
                    let nearest = nearest_centroid(v, &centroids);
                    counts[nearest] += 1;
                    for (s, x) in sums[nearest].iter_mut().zip(v.iter()) {
                        *s += x;
                    }
                    (sums, counts)
                },
            )
            .reduce(
                || (vec![vec![0.0f32; dim]; k], vec![0usize; k]),
                |(mut sums_a, mut counts_a), (sums_b, counts_b)| {
                    for i in 0..k {
                        counts_a[i] += counts_b[i];
                        for (a, b) in sums_a[i].iter_mut().zip(sums_b[i].iter()) {
                            *a += b;
                        }
                    }
                    (sums_a, counts_a)
                },
            );

        for i in 0..k {
            if counts[i] == 0 {
                continue; // keep previous centroid; an empty cluster learns nothing this round
            }
            for (c, s) in centroids[i].iter_mut().zip(sums[i].iter()) {
                *c = *s / counts[i] as f32;
            }
        }
    }

    centroids
}

/// Index of the centroid nearest `v` by squared Euclidean distance.
#[must_use]
pub fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d: f32 = v.iter().zip(c.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}
