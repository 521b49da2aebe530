//! Diagnostics built on top of trajectories and exponent estimates:
//! trajectory separation, return maps, delay embeddings, the Kaplan-Yorke
//! dimension, and a one-shot system summary.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CascadeError, Result};
use crate::lyapunov::{lyapunov_max, lyapunov_spectrum, LyapunovSettings};
use crate::trajectory::Trajectory;
use crate::traits::VectorField;

/// Distance metric for [`trajectory_divergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Norm {
    Euclidean,
    Manhattan,
    Max,
}

impl Norm {
    fn apply(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Norm::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            Norm::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Norm::Max => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max),
        }
    }
}

/// Pointwise separation of two equal-shape trajectories over time — the
/// butterfly-effect diagnostic. For a chaotic system started from nearby
/// initial conditions the separation grows exponentially until it
/// saturates at the attractor diameter.
pub fn trajectory_divergence(a: &Trajectory, b: &Trajectory, norm: Norm) -> Result<Vec<f64>> {
    if a.dim() != b.dim() || a.len() != b.len() {
        return Err(CascadeError::invalid(format!(
            "Trajectories must have the same shape: {}x{} vs {}x{}.",
            a.len(),
            a.dim(),
            b.len(),
            b.dim()
        )));
    }
    Ok((0..a.len())
        .map(|i| norm.apply(a.state(i), b.state(i)))
        .collect())
}

/// Successive-value pairs of a scalar series: `next[i] = current[i + delay]`
/// shifted views of the same underlying sequence. Fixed points land on the
/// diagonal, period-k orbits form k points, chaos traces out a curve.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnMap {
    pub current: Vec<f64>,
    pub next: Vec<f64>,
    pub delay: usize,
}

impl ReturnMap {
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Builds the return map of `series` at the given delay. A series too
/// short to form a single pair yields an empty map, not an error.
pub fn return_map(series: &[f64], delay: usize) -> Result<ReturnMap> {
    if delay == 0 {
        return Err(CascadeError::invalid("Return-map delay must be at least 1."));
    }
    if series.len() <= delay {
        debug!(
            points = series.len(),
            delay, "series too short for a return map; returning empty"
        );
        return Ok(ReturnMap {
            current: Vec::new(),
            next: Vec::new(),
            delay,
        });
    }
    Ok(ReturnMap {
        current: series[..series.len() - delay].to_vec(),
        next: series[delay..].to_vec(),
        delay,
    })
}

/// Takens reconstruction of a scalar series: point i is
/// `[x(i), x(i + delay), ..., x(i + (dim-1)·delay)]`, stored flat in
/// row-major order like [`Trajectory`].
#[derive(Debug, Clone, Serialize)]
pub struct DelayEmbedding {
    embed_dim: usize,
    points: Vec<f64>,
}

impl DelayEmbedding {
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn len(&self) -> usize {
        self.points.len() / self.embed_dim
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, idx: usize) -> &[f64] {
        &self.points[idx * self.embed_dim..(idx + 1) * self.embed_dim]
    }

    pub fn flat_points(&self) -> &[f64] {
        &self.points
    }
}

/// Embeds a scalar observable into `embed_dim` dimensions by time delay.
/// A series shorter than `(embed_dim - 1) * delay + 1` cannot produce a
/// single embedded point and is rejected.
pub fn delay_embedding(series: &[f64], delay: usize, embed_dim: usize) -> Result<DelayEmbedding> {
    if delay == 0 {
        return Err(CascadeError::invalid("Embedding delay must be at least 1."));
    }
    if embed_dim == 0 {
        return Err(CascadeError::invalid(
            "Embedding dimension must be at least 1.",
        ));
    }
    let needed = (embed_dim - 1) * delay + 1;
    if series.len() < needed {
        return Err(CascadeError::invalid(format!(
            "Series of {} points is too short for embedding dimension {} at delay {} (needs {}).",
            series.len(),
            embed_dim,
            delay,
            needed
        )));
    }

    let count = series.len() - (embed_dim - 1) * delay;
    let mut points = Vec::with_capacity(count * embed_dim);
    for i in 0..count {
        for j in 0..embed_dim {
            points.push(series[i + j * delay]);
        }
    }
    Ok(DelayEmbedding { embed_dim, points })
}

/// Kaplan-Yorke (Lyapunov) dimension of an attractor from its exponent
/// spectrum: `k + (λ₁ + ... + λ_k) / |λ_{k+1}|` where k is the largest
/// index keeping the partial sum non-negative.
pub fn kaplan_yorke_dimension(exponents: &[f64]) -> f64 {
    if exponents.is_empty() {
        return 0.0;
    }
    let mut sorted = exponents.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut partial = 0.0;
    let mut k = 0usize;
    for (idx, &lambda) in sorted.iter().enumerate() {
        let new_sum = partial + lambda;
        if new_sum >= 0.0 {
            partial = new_sum;
            k = idx + 1;
        } else {
            if lambda.abs() <= f64::EPSILON {
                return k as f64;
            }
            return k as f64 + partial / lambda.abs();
        }
    }
    k as f64
}

/// One-shot chaotic characterization of a system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub lambda_max: f64,
    pub spectrum: Vec<f64>,
    pub spectrum_sum: f64,
    pub kaplan_yorke: f64,
    pub chaotic: bool,
    /// `1 / λ₁` when chaotic: the e-folding time of prediction error.
    pub predictability_horizon: Option<f64>,
}

/// Runs both exponent estimators and derives the summary quantities.
pub fn analyze_system(
    field: &impl VectorField,
    initial_state: &[f64],
    settings: &LyapunovSettings,
    seed: Option<u64>,
) -> Result<SystemSummary> {
    let lambda_max = lyapunov_max(field, initial_state, settings, seed)?;
    let spectrum = lyapunov_spectrum(field, initial_state, settings)?;
    let spectrum_sum = spectrum.iter().sum();
    let kaplan_yorke = kaplan_yorke_dimension(&spectrum);
    let chaotic = lambda_max > 0.0;
    Ok(SystemSummary {
        lambda_max,
        spectrum,
        spectrum_sum,
        kaplan_yorke,
        chaotic,
        predictability_horizon: chaotic.then(|| 1.0 / lambda_max),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        analyze_system, delay_embedding, kaplan_yorke_dimension, return_map,
        trajectory_divergence, Norm,
    };
    use crate::error::Result;
    use crate::lyapunov::LyapunovSettings;
    use crate::systems::Lorenz;
    use crate::trajectory::{integrate_sampled, StepControl, Trajectory};

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn nearby_lorenz_trajectories_separate_exponentially() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();
        let mut y1 = y0;
        y1[0] += 1e-8;
        let control = StepControl::fixed(0.01);

        let a = integrate_sampled(&system, &y0, (0.0, 20.0), 0.01, control).unwrap();
        let b = integrate_sampled(&system, &y1, (0.0, 20.0), 0.01, control).unwrap();

        let divergence = trajectory_divergence(&a, &b, Norm::Euclidean).unwrap();
        assert_eq!(divergence.len(), a.len());
        assert!(divergence[0] < 1e-7);
        // After 20 time units at lambda ~ 0.9 the separation has grown by
        // orders of magnitude.
        assert!(divergence[divergence.len() - 1] > 1e-3);
    }

    #[test]
    fn divergence_norms_order_as_expected() {
        let a = Trajectory::from_parts(2, vec![0.0], vec![0.0, 0.0]).unwrap();
        let b = Trajectory::from_parts(2, vec![0.0], vec![3.0, 4.0]).unwrap();

        assert_eq!(trajectory_divergence(&a, &b, Norm::Euclidean).unwrap(), vec![5.0]);
        assert_eq!(trajectory_divergence(&a, &b, Norm::Manhattan).unwrap(), vec![7.0]);
        assert_eq!(trajectory_divergence(&a, &b, Norm::Max).unwrap(), vec![4.0]);
    }

    #[test]
    fn divergence_rejects_shape_mismatch() {
        let a = Trajectory::from_parts(2, vec![0.0], vec![0.0, 0.0]).unwrap();
        let b = Trajectory::from_parts(3, vec![0.0], vec![0.0, 0.0, 0.0]).unwrap();
        assert_err_contains(trajectory_divergence(&a, &b, Norm::Euclidean), "same shape");
    }

    #[test]
    fn return_map_pairs_are_shifted_views() {
        let series = [1.0, 2.0, 3.0, 4.0, 5.0];
        let map = return_map(&series, 2).unwrap();
        assert_eq!(map.current, vec![1.0, 2.0, 3.0]);
        assert_eq!(map.next, vec![3.0, 4.0, 5.0]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn short_series_yield_an_empty_return_map() {
        let map = return_map(&[1.0, 2.0], 5).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.delay, 5);

        assert_err_contains(return_map(&[1.0, 2.0], 0), "at least 1");
    }

    #[test]
    fn delay_embedding_reconstructs_the_expected_rows() {
        let series = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let embedding = delay_embedding(&series, 2, 3).unwrap();
        assert_eq!(embedding.embed_dim(), 3);
        assert_eq!(embedding.len(), 2);
        assert_eq!(embedding.point(0), &[0.0, 2.0, 4.0]);
        assert_eq!(embedding.point(1), &[1.0, 3.0, 5.0]);
    }

    #[test]
    fn delay_embedding_rejects_insufficient_series() {
        assert_err_contains(delay_embedding(&[1.0, 2.0], 2, 3), "too short");
        assert_err_contains(delay_embedding(&[1.0, 2.0], 0, 2), "at least 1");
        assert_err_contains(delay_embedding(&[1.0, 2.0], 1, 0), "at least 1");
    }

    #[test]
    fn kaplan_yorke_handles_empty_and_partial_sums() {
        assert_eq!(kaplan_yorke_dimension(&[]), 0.0);
        // k = 2 with partial sum 0.1 against |lambda_3| = 1.
        let result = kaplan_yorke_dimension(&[0.1, 0.0, -1.0]);
        assert!((result - 2.1).abs() < 1e-12);
        // Fully contracting spectrum has dimension 0.
        assert_eq!(kaplan_yorke_dimension(&[-1.0, -2.0]), 0.0);
    }

    #[test]
    fn lorenz_summary_reports_chaos() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();
        let settings = LyapunovSettings::default();

        let summary = analyze_system(&system, &y0, &settings, Some(21)).unwrap();
        assert!(summary.chaotic);
        assert!(summary.lambda_max > 0.0);
        assert_eq!(summary.spectrum.len(), 3);
        assert!(summary.spectrum_sum < 0.0);
        // The Lorenz attractor's fractal dimension is just above 2.
        assert!(summary.kaplan_yorke > 1.9 && summary.kaplan_yorke < 2.3);
        let horizon = summary.predictability_horizon.unwrap();
        assert!((horizon - 1.0 / summary.lambda_max).abs() < 1e-12);
    }
}
