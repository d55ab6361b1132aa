//! Small clustering routines used by the detectors.
//!
//! - [`Dbscan`]: density-based clustering over 2-D points. A point is a core
//!   point when at least `min_samples` points (itself included) lie within
//!   `eps`; clusters grow from core points and absorb reachable border
//!   points; everything else is noise. Cluster ids follow the order in which
//!   clusters are first discovered while scanning points in input order.
//! - [`KMeans1d`]: Lloyd's algorithm on scalar samples with deterministic
//!   seeding at evenly spaced order statistics (min and max for k = 2).

use serde::{Deserialize, Serialize};

/// Density clustering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dbscan {
    /// Neighborhood radius.
    pub eps: f64,
    /// Minimum neighborhood size (including the point) for a core point.
    pub min_samples: usize,
}

impl Default for Dbscan {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 2,
        }
    }
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    /// Labels every point with its cluster id, `None` for noise.
    pub fn fit(&self, points: &[[f64; 2]]) -> Vec<Option<usize>> {
        let n = points.len();
        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut visited = vec![false; n];
        let index = SweepIndex::new(points);
        let mut next_cluster = 0;

        for i in 0..n {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let neighbors = index.neighbors(points, i, self.eps);
            if neighbors.len() < self.min_samples {
                continue;
            }

            let cluster = next_cluster;
            next_cluster += 1;
            labels[i] = Some(cluster);

            let mut queue = neighbors;
            let mut head = 0;
            while head < queue.len() {
                let j = queue[head];
                head += 1;

                if labels[j].is_none() {
                    labels[j] = Some(cluster);
                }
                if visited[j] {
                    continue;
                }
                visited[j] = true;

                let expansion = index.neighbors(points, j, self.eps);
                if expansion.len() >= self.min_samples {
                    queue.extend(expansion);
                }
            }
        }

        labels
    }

    /// Clusters scalar values (e.g. timestamps).
    pub fn fit_1d(&self, values: &[f64]) -> Vec<Option<usize>> {
        let points: Vec<[f64; 2]> = values.iter().map(|&v| [v, 0.0]).collect();
        self.fit(&points)
    }

    /// Groups point indices by cluster id, in cluster id order.
    pub fn groups(labels: &[Option<usize>]) -> Vec<Vec<usize>> {
        let count = labels.iter().flatten().max().map_or(0, |m| m + 1);
        let mut groups = vec![Vec::new(); count];
        for (i, label) in labels.iter().enumerate() {
            if let Some(cluster) = label {
                groups[*cluster].push(i);
            }
        }
        groups
    }
}

/// Points sorted on the first coordinate. Any neighbor within `eps` must
/// also be within `eps` on that axis, which bounds the scan.
struct SweepIndex {
    order: Vec<usize>,
    xs: Vec<f64>,
}

impl SweepIndex {
    fn new(points: &[[f64; 2]]) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| points[a][0].total_cmp(&points[b][0]));
        let xs = order.iter().map(|&i| points[i][0]).collect();
        Self { order, xs }
    }

    fn neighbors(&self, points: &[[f64; 2]], i: usize, eps: f64) -> Vec<usize> {
        let [x, y] = points[i];
        let start = self.xs.partition_point(|&v| v < x - eps);
        let mut found = Vec::new();

        for pos in start..self.xs.len() {
            if self.xs[pos] > x + eps {
                break;
            }
            let j = self.order[pos];
            let [xj, yj] = points[j];
            if (xj - x).hypot(yj - y) <= eps {
                found.push(j);
            }
        }

        found.sort_unstable();
        found
    }
}

/// Result of a k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub centers: Vec<f64>,
    pub labels: Vec<usize>,
}

impl KMeansFit {
    /// Number of samples assigned to `cluster`.
    pub fn size(&self, cluster: usize) -> usize {
        self.labels.iter().filter(|&&l| l == cluster).count()
    }

    /// Index of the cluster with the smallest center.
    pub fn lowest(&self) -> usize {
        self.centers
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i)
    }

    /// Index of the cluster with the largest center.
    pub fn highest(&self) -> usize {
        self.centers
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i)
    }
}

/// One-dimensional k-means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeans1d {
    pub k: usize,
    pub max_iterations: usize,
}

impl Default for KMeans1d {
    fn default() -> Self {
        Self {
            k: 2,
            max_iterations: 300,
        }
    }
}

impl KMeans1d {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    /// Fits the samples. Returns `None` when there are fewer samples than
    /// clusters.
    pub fn fit(&self, values: &[f64]) -> Option<KMeansFit> {
        if self.k == 0 || values.len() < self.k {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut centers: Vec<f64> = if self.k == 1 {
            vec![sorted[sorted.len() / 2]]
        } else {
            (0..self.k)
                .map(|c| sorted[c * (sorted.len() - 1) / (self.k - 1)])
                .collect()
        };

        let mut labels = vec![usize::MAX; values.len()];
        for _ in 0..self.max_iterations.max(1) {
            let mut changed = false;
            for (label, &v) in labels.iter_mut().zip(values) {
                let nearest = nearest_center(&centers, v);
                if *label != nearest {
                    *label = nearest;
                    changed = true;
                }
            }

            let mut sums = vec![0.0; self.k];
            let mut counts = vec![0usize; self.k];
            for (&label, &v) in labels.iter().zip(values) {
                sums[label] += v;
                counts[label] += 1;
            }
            for c in 0..self.k {
                // An empty cluster keeps its previous center.
                if counts[c] > 0 {
                    centers[c] = sums[c] / counts[c] as f64;
                }
            }

            if !changed {
                break;
            }
        }

        Some(KMeansFit { centers, labels })
    }
}

fn nearest_center(centers: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &c) in centers.iter().enumerate() {
        let dist = (value - c).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbscan_separates_groups() {
        let values = [0.0, 0.1, 0.2, 5.0, 5.3, 10.0];
        let labels = Dbscan::new(0.5, 2).fit_1d(&values);

        assert_eq!(labels[0], Some(0));
        assert_eq!(labels[1], Some(0));
        assert_eq!(labels[2], Some(0));
        assert_eq!(labels[3], Some(1));
        assert_eq!(labels[4], Some(1));
        assert_eq!(labels[5], None);
    }

    #[test]
    fn test_dbscan_chains_through_core_points() {
        // Each step is within eps, the ends are not.
        let values = [0.0, 0.4, 0.8, 1.2];
        let labels = Dbscan::new(0.5, 2).fit_1d(&values);
        assert!(labels.iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn test_dbscan_border_point_not_expanded() {
        // 0.65 has only two neighbors: it joins the cluster as a border
        // point, and 1.2 stays noise.
        let values = [0.0, 0.1, 0.2, 0.65, 1.2];
        let labels = Dbscan::new(0.5, 3).fit_1d(&values);
        assert_eq!(labels, vec![Some(0), Some(0), Some(0), Some(0), None]);
    }

    #[test]
    fn test_dbscan_uses_both_axes() {
        let points = [[0.0, 0.0], [0.1, 0.0], [0.1, 3.0], [0.2, 3.1]];
        let labels = Dbscan::new(0.5, 2).fit(&points);
        assert_eq!(labels, vec![Some(0), Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn test_dbscan_empty_and_groups() {
        assert!(Dbscan::default().fit(&[]).is_empty());

        let groups = Dbscan::groups(&[Some(1), None, Some(0), Some(1)]);
        assert_eq!(groups, vec![vec![2], vec![0, 3]]);
        assert!(Dbscan::groups(&[None, None]).is_empty());
    }

    #[test]
    fn test_kmeans_two_clusters() {
        let values = [0.01, 0.012, 1.0, 0.011, 0.98, 1.02];
        let fit = KMeans1d::new(2).fit(&values).unwrap();

        let low = fit.lowest();
        let high = fit.highest();
        assert_ne!(low, high);
        assert_eq!(fit.size(low), 3);
        assert_eq!(fit.size(high), 3);
        assert!((fit.centers[high] - 1.0).abs() < 1e-9);
        assert!((fit.centers[low] - 0.011).abs() < 1e-9);
    }

    #[test]
    fn test_kmeans_too_few_samples() {
        assert!(KMeans1d::new(2).fit(&[1.0]).is_none());
        assert!(KMeans1d::new(0).fit(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_kmeans_constant_input() {
        let fit = KMeans1d::new(2).fit(&[0.5; 6]).unwrap();
        assert_eq!(fit.centers, vec![0.5, 0.5]);
        assert_eq!(fit.size(0), 6);
    }
}
