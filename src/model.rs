//! K-Means clustering used for customer segmentation

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::analysis::numeric_values;
use crate::error::Error;

/// Seed for every segmentation run, so identical input gives identical clusters.
pub const SEGMENT_SEED: u64 = 42;
pub const DEFAULT_MAX_ITERS: u64 = 300;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    pub n_clusters: usize,
    /// Cluster assignment for every input row
    pub labels: Array1<usize>,
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Stack the named numeric columns of `df` into an `(rows, columns)` matrix.
pub fn feature_matrix<S: AsRef<str>>(df: &DataFrame, columns: &[S]) -> crate::Result<Array2<f64>> {
    let values: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| numeric_values(df, c.as_ref()))
        .collect::<crate::Result<_>>()?;

    let n_samples = df.height();
    let mut raw = Vec::with_capacity(n_samples * columns.len());
    for i in 0..n_samples {
        raw.extend(values.iter().map(|column| column[i]));
    }

    Ok(Array2::from_shape_vec((n_samples, columns.len()), raw)?)
}

/// Fit K-Means on `features` with a seeded generator.
///
/// # Arguments
/// * `features` - One row per sample
/// * `n_clusters` - Must be between 1 and the number of rows
/// * `seed` - Seed for centroid initialisation
/// * `max_iters` - Maximum iterations for convergence
/// * `tolerance` - Convergence tolerance
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    seed: u64,
    max_iters: u64,
    tolerance: f64,
) -> crate::Result<KMeansModel> {
    let n_samples = features.nrows();
    if n_clusters == 0 || n_samples < n_clusters {
        return Err(Error::InvalidClusterCount {
            clusters: n_clusters,
            rows: n_samples,
        });
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let model = KMeans::params_with(n_clusters, StdRng::seed_from_u64(seed), L2Dist)
        .max_n_iterations(max_iters)
        .tolerance(tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(&dataset);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            squared_distance(
                features.row(i).iter().copied(),
                centroids.row(cluster).iter().copied(),
            )
        })
        .sum()
}

fn squared_distance(a: impl Iterator<Item = f64>, b: impl Iterator<Item = f64>) -> f64 {
    a.zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_features() -> Array2<f64> {
        Array2::from_shape_vec(
            (6, 2),
            vec![
                1.0, 1.0, //
                1.2, 0.8, //
                10.0, 10.0, //
                10.5, 9.5, //
                50.0, 50.0, //
                49.0, 51.0,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fit_kmeans() {
        let features = create_test_features();
        let model = fit_kmeans(&features, 3, SEGMENT_SEED, 100, 1e-4).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[3, 2]);
        assert!(model.inertia.is_finite() && model.inertia >= 0.0);

        // well separated pairs share a cluster
        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[2], model.labels[3]);
        assert_eq!(model.labels[4], model.labels[5]);
    }

    #[test]
    fn test_same_seed_same_labels() {
        let features = create_test_features();
        let a = fit_kmeans(&features, 3, SEGMENT_SEED, 100, 1e-4).unwrap();
        let b = fit_kmeans(&features, 3, SEGMENT_SEED, 100, 1e-4).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_cluster_sizes() {
        let features = create_test_features();
        let model = fit_kmeans(&features, 3, SEGMENT_SEED, 100, 1e-4).unwrap();

        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_invalid_cluster_count() {
        let features = create_test_features();
        assert!(matches!(
            fit_kmeans(&features, 0, SEGMENT_SEED, 100, 1e-4),
            Err(Error::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            fit_kmeans(&features, 7, SEGMENT_SEED, 100, 1e-4),
            Err(Error::InvalidClusterCount { clusters: 7, rows: 6 })
        ));
    }

    #[test]
    fn test_feature_matrix_is_row_major() {
        let df = polars::df!(
            "amount" => [1.0, 2.0],
            "quantity" => [10i64, 20],
        )
        .unwrap();
        let features = feature_matrix(&df, &["amount", "quantity"]).unwrap();
        assert_eq!(features, ndarray::array![[1.0, 10.0], [2.0, 20.0]]);
    }
}
