//! Runtime-selected SIMD dispatch for distance kernels.
//!
//! The dispatch table is built once per process (via [`std::sync::OnceLock`])
//! from CPU feature detection, mirroring the "detect once, cache a function
//! pointer" shape used throughout the engine for anything that would
//! otherwise re-probe hot loops. A scalar fallback is always present: on
//! targets where lane vectorization buys nothing, the table points straight
//! at the scalar kernels in [`crate::distance`].

use std::sync::OnceLock;

use wide::f32x8;

use crate::distance::{self, DistanceKind};

type Kernel = fn(&[f32], &[f32]) -> f32;

struct DispatchTable {
    euclidean: Kernel,
    cosine: Kernel,
    dot: Kernel,
    manhattan: Kernel,
}

static TABLE: OnceLock<DispatchTable> = OnceLock::new();

fn table() -> &'static DispatchTable {
    TABLE.get_or_init(|| {
        if simd_lanes_available() {
            DispatchTable {
                euclidean: euclidean_simd,
                cosine: cosine_simd,
                dot: dot_simd,
                manhattan: manhattan_simd,
            }
        } else {
            DispatchTable {
                euclidean: distance::euclidean_scalar,
                cosine: distance::cosine_scalar,
                dot: distance::dot_scalar,
                manhattan: distance::manhattan_scalar,
            }
        }
    })
}

/// Whether this process should use the lane-vectorized kernels.
///
/// `wide` emits a portable SIMD kernel for every supported target, but the
/// table still gates it behind an explicit feature probe so there is a real
/// decision being cached rather than an unconditional choice.
fn simd_lanes_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_feature_detected!("avx2") || std::is_x86_feature_detected!("sse4.1")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("neon")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// Computes `kind.distance(a, b)` using the cached dispatch table.
///
/// Callers must have already checked `a.len() == b.len()` and non-empty;
/// this function trusts that and does not re-check the sentinel case.
pub(crate) fn dispatch(kind: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    let t = table();
    match kind {
        DistanceKind::Euclidean => (t.euclidean)(a, b),
        DistanceKind::Cosine => (t.cosine)(a, b),
        DistanceKind::DotProduct => (t.dot)(a, b),
        DistanceKind::Manhattan => (t.manhattan)(a, b),
    }
}

#[inline]
fn lane(slice: &[f32], base: usize) -> f32x8 {
    f32x8::from(<[f32; 8]>::try_from(&slice[base..base + 8]).expect("8-wide chunk"))
}

fn euclidean_simd(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let base = i * 8;
        let d = lane(a, base) - lane(b, base);
        acc += d * d;
    }
    let mut sum: f32 = acc.to_array().iter().sum();
    for i in (chunks * 8)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum.sqrt()
}

fn cosine_simd(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut dot_acc = f32x8::ZERO;
    let mut na_acc = f32x8::ZERO;
    let mut nb_acc = f32x8::ZERO;
    for i in 0..chunks {
        let base = i * 8;
        let va = lane(a, base);
        let vb = lane(b, base);
        dot_acc += va * vb;
        na_acc += va * va;
        nb_acc += vb * vb;
    }
    let mut dot: f32 = dot_acc.to_array().iter().sum();
    let mut norm_a: f32 = na_acc.to_array().iter().sum();
    let mut norm_b: f32 = nb_acc.to_array().iter().sum();
    for i in (chunks * 8)..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn dot_simd(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let base = i * 8;
        acc += lane(a, base) * lane(b, base);
    }
    let mut dot: f32 = acc.to_array().iter().sum();
    for i in (chunks * 8)..a.len() {
        dot += a[i] * b[i];
    }
    -dot
}

fn manhattan_simd(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / 8;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let base = i * 8;
        acc += (lane(a, base) - lane(b, base)).abs();
    }
    let mut sum: f32 = acc.to_array().iter().sum();
    for i in (chunks * 8)..a.len() {
        sum += (a[i] - b[i]).abs();
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceKind;

    fn random_vec(n: usize, seed: u32) -> Vec<f32> {
        (0..n)
            .map(|i| ((seed.wrapping_mul(7919).wrapping_add(i as u32)) as f32 * 0.001).sin())
            .collect()
    }

    #[test]
    fn simd_matches_scalar_on_non_multiple_of_eight() {
        for len in [1usize, 3, 7, 8, 9, 15, 16, 17, 63, 129] {
            let a = random_vec(len, 11);
            let b = random_vec(len, 97);
            for kind in [
                DistanceKind::Euclidean,
                DistanceKind::Cosine,
                DistanceKind::DotProduct,
                DistanceKind::Manhattan,
            ] {
                let scalar = kind.distance_scalar(&a, &b);
                let simd = dispatch(kind, &a, &b);
                assert!(
                    (scalar - simd).abs() < 1e-3,
                    "len={len} kind={kind:?} scalar={scalar} simd={simd}"
                );
            }
        }
    }

    #[test]
    fn dispatch_table_is_stable_across_calls() {
        let a = random_vec(32, 1);
        let b = random_vec(32, 2);
        let d1 = dispatch(DistanceKind::Euclidean, &a, &b);
        let d2 = dispatch(DistanceKind::Euclidean, &a, &b);
        assert_eq!(d1, d2);
    }
}
