//! Weighted reservoir sampling for the list processor.
//!
//! The candidate pool is ranked by average daily pageviews and drawn with
//! A-ExpJ (Efraimidis–Spirakis with exponential jumps): each item gets the
//! key `u^(1/w)` for uniform `u` in (0,1], and the `k` largest keys win.
//! Weights follow a rank curve, so popular pages are strongly favored but
//! the tail still gets sampled.

use crate::config::SampleWeights;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// `w = min + (max - min) * (1 - rank/N)^exponent` for a 0-based rank.
pub fn rank_weight(rank: usize, total: usize, curve: &SampleWeights) -> f64 {
    if total == 0 {
        return curve.min_weight;
    }
    let position = 1.0 - rank as f64 / total as f64;
    curve.min_weight + (curve.max_weight - curve.min_weight) * position.powf(curve.exponent)
}

/// An f64 key that orders through a BinaryHeap. Keys produced here are
/// always finite, so total ordering is safe.
#[derive(PartialEq, PartialOrd)]
struct Key(f64);

impl Eq for Key {}

#[allow(clippy::derive_ord_xor_partial_ord)]
impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Draw `k` items without replacement, weighted, via A-ExpJ. The result is
/// ordered by descending key, i.e. the strongest draws first.
pub fn weighted_sample<T>(items: Vec<(T, f64)>, k: usize, rng: &mut impl Rng) -> Vec<T> {
    if k == 0 || items.is_empty() {
        return Vec::new();
    }

    // Min-heap of (key, index into `taken`).
    let mut reservoir: BinaryHeap<Reverse<(Key, usize)>> = BinaryHeap::with_capacity(k);
    let mut taken: Vec<Option<T>> = Vec::with_capacity(k);
    let mut jump: f64 = 0.0;
    let mut jump_pending = false;

    for (item, weight) in items {
        let weight = weight.max(f64::MIN_POSITIVE);
        if reservoir.len() < k {
            let key = uniform_open(rng).powf(1.0 / weight);
            taken.push(Some(item));
            reservoir.push(Reverse((Key(key), taken.len() - 1)));
            if reservoir.len() == k {
                jump = next_jump(&reservoir, rng);
                jump_pending = true;
            }
            continue;
        }

        if !jump_pending {
            jump = next_jump(&reservoir, rng);
            jump_pending = true;
        }
        jump -= weight;
        if jump > 0.0 {
            continue;
        }

        // This item crosses the jump: it replaces the current minimum with
        // a key re-drawn from (t_w, 1], t_w = T_w^w.
        let threshold = reservoir
            .peek()
            .map(|Reverse((Key(t), _))| *t)
            .unwrap_or(0.0);
        let floor = threshold.powf(weight);
        let u = floor + (1.0 - floor) * uniform_open(rng);
        let key = u.powf(1.0 / weight);

        if let Some(Reverse((_, slot))) = reservoir.pop() {
            taken[slot] = Some(item);
            reservoir.push(Reverse((Key(key), slot)));
        }
        jump_pending = false;
    }

    // Drain by descending key.
    let mut ordered: Vec<(Key, usize)> = reservoir.into_iter().map(|Reverse(pair)| pair).collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));
    ordered
        .into_iter()
        .filter_map(|(_, slot)| taken[slot].take())
        .collect()
}

fn next_jump(reservoir: &BinaryHeap<Reverse<(Key, usize)>>, rng: &mut impl Rng) -> f64 {
    let threshold = reservoir
        .peek()
        .map(|Reverse((Key(t), _))| *t)
        .unwrap_or(f64::MIN_POSITIVE);
    uniform_open(rng).ln() / threshold.max(f64::MIN_POSITIVE).ln()
}

/// Uniform in (0, 1]; `powf` and `ln` both need to avoid exact zero.
fn uniform_open(rng: &mut impl Rng) -> f64 {
    1.0 - rng.gen::<f64>()
}

/// Fallback when no pageviews data exists: uniform without replacement.
pub fn uniform_sample<T>(mut items: Vec<T>, k: usize, rng: &mut impl Rng) -> Vec<T> {
    items.shuffle(rng);
    items.truncate(k);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn weight_curve_is_monotonic_in_rank() {
        let curve = SampleWeights {
            min_weight: 1.0,
            max_weight: 8.0,
            exponent: 3.0,
        };
        let top = rank_weight(0, 100, &curve);
        let mid = rank_weight(50, 100, &curve);
        let bottom = rank_weight(99, 100, &curve);
        assert!(top > mid && mid > bottom);
        assert!(top <= curve.max_weight);
        assert!(bottom >= curve.min_weight);
    }

    #[test]
    fn sample_returns_k_distinct_items() {
        let mut rng = StdRng::seed_from_u64(42);
        let items: Vec<(usize, f64)> = (0..100).map(|i| (i, 1.0 + i as f64)).collect();
        let picked = weighted_sample(items, 10, &mut rng);
        assert_eq!(picked.len(), 10);
        let unique: std::collections::HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn sample_with_k_larger_than_n_returns_all() {
        let mut rng = StdRng::seed_from_u64(42);
        let items: Vec<(usize, f64)> = (0..5).map(|i| (i, 1.0)).collect();
        let picked = weighted_sample(items, 50, &mut rng);
        assert_eq!(picked.len(), 5);
    }

    #[test]
    fn heavy_weights_dominate() {
        // One item carries overwhelming weight; over many draws it should
        // essentially always be selected.
        let mut hits = 0;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut items: Vec<(usize, f64)> = (0..50).map(|i| (i, 0.01)).collect();
            items.push((999, 10_000.0));
            let picked = weighted_sample(items, 5, &mut rng);
            if picked.contains(&999) {
                hits += 1;
            }
        }
        assert!(hits > 190, "heavy item picked only {hits}/200 times");
    }

    #[test]
    fn uniform_sample_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = uniform_sample((0..30).collect(), 10, &mut rng);
        assert_eq!(picked.len(), 10);
        let picked = uniform_sample((0..3).collect(), 10, &mut rng);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn zero_k_is_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(weighted_sample::<u32>(vec![(1, 1.0)], 0, &mut rng).is_empty());
    }
}
