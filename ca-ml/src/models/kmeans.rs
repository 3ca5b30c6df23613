//! K-means clustering with k-means++ initialisation

use ca_common::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const MIN_CLUSTERS: usize = 2;
pub const MAX_CLUSTERS: usize = 20;

const MAX_ITERATIONS: usize = 300;
const TOLERANCE: f64 = 1e-4;
const RESTARTS: usize = 10;

/// Points used for silhouette scoring are capped to keep it quadratic in a
/// bounded size
const SILHOUETTE_SAMPLE: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the nearest centroid
    pub inertia: f64,
    pub iterations: usize,
}

impl KMeans {
    /// Fit `k` clusters, keeping the best of several seeded restarts
    pub fn fit(rows: &[Vec<f64>], k: usize, seed: u64) -> Result<Self> {
        if !(MIN_CLUSTERS..=MAX_CLUSTERS).contains(&k) {
            return Err(Error::InvalidInput(format!(
                "n_clusters must be between {} and {}, got {}",
                MIN_CLUSTERS, MAX_CLUSTERS, k
            )));
        }
        if rows.len() < k {
            return Err(Error::InsufficientData(format!(
                "{} samples cannot form {} clusters",
                rows.len(),
                k
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut best: Option<KMeans> = None;

        for _ in 0..RESTARTS {
            let candidate = run_once(rows, k, &mut rng);
            if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
                best = Some(candidate);
            }
        }

        best.ok_or_else(|| Error::Internal("k-means produced no model".to_string()))
    }

    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Index of the nearest centroid
    pub fn predict(&self, row: &[f64]) -> usize {
        nearest(&self.centroids, row).0
    }

    pub fn predict_all(&self, rows: &[Vec<f64>]) -> Vec<usize> {
        rows.iter().map(|r| self.predict(r)).collect()
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// (index, squared distance) of the nearest centroid
fn nearest(centroids: &[Vec<f64>], row: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(c, row);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn init_plus_plus(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(rows[rng.gen_range(0..rows.len())].clone());

    let mut distances: Vec<f64> = rows
        .iter()
        .map(|r| squared_distance(r, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut index = rows.len() - 1;
            for (i, d) in distances.iter().enumerate() {
                if target < *d {
                    index = i;
                    break;
                }
                target -= d;
            }
            index
        } else {
            rng.gen_range(0..rows.len())
        };

        let centroid = rows[chosen].clone();
        for (d, r) in distances.iter_mut().zip(rows) {
            *d = d.min(squared_distance(r, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn run_once(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> KMeans {
    let width = rows[0].len();
    let mut centroids = init_plus_plus(rows, k, rng);
    let mut labels = vec![0usize; rows.len()];
    let mut iterations = 0;

    for iteration in 1..=MAX_ITERATIONS {
        iterations = iteration;

        for (label, row) in labels.iter_mut().zip(rows) {
            *label = nearest(&centroids, row).0;
        }

        let mut sums = vec![vec![0.0; width]; k];
        let mut counts = vec![0usize; k];
        for (label, row) in labels.iter().zip(rows) {
            counts[*label] += 1;
            for (s, x) in sums[*label].iter_mut().zip(row) {
                *s += x;
            }
        }

        let mut updated: Vec<Vec<f64>> = sums
            .into_iter()
            .zip(&counts)
            .zip(&centroids)
            .map(|((sum, &count), old)| {
                if count == 0 {
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f64).collect()
                }
            })
            .collect();

        // Re-seed empty clusters with the point farthest from its centroid
        for cluster in (0..k).filter(|c| counts[*c] == 0) {
            let farthest = rows
                .iter()
                .enumerate()
                .map(|(i, r)| (i, nearest(&updated, r).1))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            updated[cluster] = rows[farthest].clone();
        }

        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(a, b)| squared_distance(a, b).sqrt())
            .sum();
        centroids = updated;

        if shift <= TOLERANCE {
            break;
        }
    }

    let inertia = rows.iter().map(|r| nearest(&centroids, r).1).sum();

    KMeans {
        centroids,
        inertia,
        iterations,
    }
}

/// Mean silhouette coefficient; 0 when fewer than two clusters are populated
pub fn silhouette_score(rows: &[Vec<f64>], labels: &[usize]) -> f64 {
    let n = rows.len().min(labels.len());
    let step = n.div_ceil(SILHOUETTE_SAMPLE).max(1);
    let sample: Vec<usize> = (0..n).step_by(step).collect();

    let k = sample.iter().map(|&i| labels[i]).max().map_or(0, |m| m + 1);
    let mut sizes = vec![0usize; k];
    for &i in &sample {
        sizes[labels[i]] += 1;
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    for &i in &sample {
        let own = labels[i];
        if sizes[own] <= 1 {
            // Singleton clusters contribute 0
            continue;
        }

        let mut sums = vec![0.0; k];
        for &j in &sample {
            if i != j {
                sums[labels[j]] += squared_distance(&rows[i], &rows[j]).sqrt();
            }
        }

        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / sample.len() as f64
}
