// THEORY:
// One-dimensional, two-cluster k-means over scalar samples.
//
// The result must be reproducible, so no attempt uses an unseeded generator:
// - attempt 1 starts from the sample minimum and maximum, the natural guess for a
//   bimodal field;
// - attempt 2 uses k-means++ driven by a fixed-seed `StdRng`.
// Each attempt runs Lloyd iterations until the centroids move less than the
// tolerance or the iteration budget runs out. The attempt with the lowest
// compactness (sum of squared distances to the nearest centroid) wins; on a tie the
// earlier attempt is kept.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KMEANS_PLUS_PLUS_SEED: u64 = 0x5eed_9111;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KmeansParams {
    pub max_iterations: usize,
    pub epsilon: f64,
    pub attempts: usize,
}

impl Default for KmeansParams {
    fn default() -> Self {
        KmeansParams {
            max_iterations: 20,
            epsilon: 1e-3,
            attempts: 2,
        }
    }
}

/// Two centroids in ascending order plus the compactness of the partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoClusters {
    pub low: f64,
    pub high: f64,
    pub compactness: f64,
}

impl TwoClusters {
    /// True when `value` belongs to the higher centroid.
    pub fn is_high(&self, value: f64) -> bool {
        (value - self.high).powi(2) < (value - self.low).powi(2)
    }
}

/// Returns `None` when there are no samples.
pub fn two_means(samples: &[f32], params: KmeansParams) -> Option<TwoClusters> {
    if samples.is_empty() {
        return None;
    }

    let (minimum, maximum) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
        (lo.min(*v as f64), hi.max(*v as f64))
    });

    let mut rng = StdRng::seed_from_u64(KMEANS_PLUS_PLUS_SEED);
    let mut best: Option<TwoClusters> = None;
    for attempt in 0..params.attempts.max(1) {
        let start = if attempt == 0 {
            (minimum, maximum)
        } else {
            plus_plus_start(samples, &mut rng)
        };
        let candidate = refine(samples, start, params);
        if best.is_none_or(|b| candidate.compactness < b.compactness) {
            best = Some(candidate);
        }
    }
    best
}

fn plus_plus_start(samples: &[f32], rng: &mut StdRng) -> (f64, f64) {
    let first = samples[rng.random_range(0..samples.len())] as f64;
    let total: f64 = samples.iter().map(|v| (*v as f64 - first).powi(2)).sum();
    if total <= 0.0 {
        return (first, first);
    }

    let target = rng.random::<f64>() * total;
    let mut running = 0.0;
    let mut second = first;
    for value in samples {
        running += (*value as f64 - first).powi(2);
        if running >= target {
            second = *value as f64;
            break;
        }
    }
    (first, second)
}

fn refine(samples: &[f32], start: (f64, f64), params: KmeansParams) -> TwoClusters {
    let (mut first, mut second) = start;
    for _ in 0..params.max_iterations {
        let (mut sum_first, mut count_first) = (0.0f64, 0usize);
        let (mut sum_second, mut count_second) = (0.0f64, 0usize);
        for value in samples {
            let value = *value as f64;
            if (value - first).powi(2) <= (value - second).powi(2) {
                sum_first += value;
                count_first += 1;
            } else {
                sum_second += value;
                count_second += 1;
            }
        }

        let next_first = if count_first > 0 { sum_first / count_first as f64 } else { first };
        let next_second = if count_second > 0 { sum_second / count_second as f64 } else { second };
        let shift = (next_first - first).abs().max((next_second - second).abs());
        first = next_first;
        second = next_second;
        if shift <= params.epsilon {
            break;
        }
    }

    let compactness = samples
        .iter()
        .map(|v| {
            let value = *v as f64;
            (value - first).powi(2).min((value - second).powi(2))
        })
        .sum();

    TwoClusters {
        low: first.min(second),
        high: first.max(second),
        compactness,
    }
}
