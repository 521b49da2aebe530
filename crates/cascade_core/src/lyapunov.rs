//! Lyapunov exponent estimation by tangent-flow propagation.
//!
//! The base state and a block of tangent vectors form one augmented system
//! with RHS `dx/dt = f(t, x)`, `dΦ/dt = J(t, x)·Φ`, advanced with a
//! fixed-step integrator. J is the central-finite-difference Jacobian of
//! the vector field. Every `renorm_interval` steps the tangent block is
//! renormalized (single vector) or QR re-orthonormalized (full basis);
//! past the transient, the accumulated log stretching factors give the
//! exponents.

use std::cell::RefCell;

use nalgebra::linalg::QR;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::solvers::{Tsit5, RK4};
use crate::traits::{Steppable, VectorField};

/// Fixed-step integrator for the augmented tangent system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TangentStepper {
    Rk4,
    Tsit5,
}

impl TangentStepper {
    fn build(self, dim: usize) -> InternalStepper {
        match self {
            TangentStepper::Rk4 => InternalStepper::Rk4(RK4::new(dim)),
            TangentStepper::Tsit5 => InternalStepper::Tsit5(Tsit5::new(dim)),
        }
    }
}

enum InternalStepper {
    Rk4(RK4),
    Tsit5(Tsit5),
}

impl InternalStepper {
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64) {
        match self {
            InternalStepper::Rk4(s) => s.step(field, t, state, dt),
            InternalStepper::Tsit5(s) => s.step(field, t, state, dt),
        }
    }
}

/// Settings shared by [`lyapunov_max`] and [`lyapunov_spectrum`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LyapunovSettings {
    /// Fixed integration step for the augmented system.
    pub dt: f64,
    /// Total integration time.
    pub total_time: f64,
    /// Initial span discarded before growth rates are accumulated, letting
    /// the trajectory settle onto the attractor.
    pub transient_time: f64,
    /// Steps between renormalizations of the tangent block.
    pub renorm_interval: usize,
    /// Perturbation size for the finite-difference Jacobian.
    pub jacobian_step: f64,
    pub stepper: TangentStepper,
}

impl Default for LyapunovSettings {
    fn default() -> Self {
        Self {
            dt: 0.01,
            total_time: 100.0,
            transient_time: 10.0,
            renorm_interval: 10,
            jacobian_step: 1e-6,
            stepper: TangentStepper::Rk4,
        }
    }
}

impl LyapunovSettings {
    fn validate(&self, field: &impl VectorField, initial_state: &[f64]) -> Result<usize> {
        let dim = field.dimension();
        if dim == 0 {
            return Err(CascadeError::invalid(
                "Vector field must have positive dimension.",
            ));
        }
        if initial_state.len() != dim {
            return Err(CascadeError::invalid(format!(
                "Initial state has dimension {}, but the vector field expects {}.",
                initial_state.len(),
                dim
            )));
        }
        if initial_state.iter().any(|v| !v.is_finite()) {
            return Err(CascadeError::invalid(
                "Initial state contains non-finite values.",
            ));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(CascadeError::invalid("Step size dt must be positive."));
        }
        if !self.total_time.is_finite() || self.total_time <= 0.0 {
            return Err(CascadeError::invalid("Total time must be positive."));
        }
        if !self.transient_time.is_finite() || self.transient_time < 0.0 {
            return Err(CascadeError::invalid(
                "Transient time must be non-negative.",
            ));
        }
        if self.renorm_interval == 0 {
            return Err(CascadeError::invalid(
                "Renormalization interval must be at least 1.",
            ));
        }
        if !self.jacobian_step.is_finite() || self.jacobian_step <= 0.0 {
            return Err(CascadeError::invalid(
                "Jacobian perturbation step must be positive.",
            ));
        }
        Ok(dim)
    }
}

struct JacobianScratch {
    perturbed: Vec<f64>,
    f_plus: Vec<f64>,
    f_minus: Vec<f64>,
    jacobian: Vec<f64>,
}

/// The augmented system `dx/dt = f`, `dΦ/dt = J·Φ`. The tangent block is a
/// row-major n×k matrix appended to the base state (k = 1 for the largest
/// exponent, k = n for the spectrum). Scratch buffers live in a RefCell so
/// evaluation stays `&self` per the [`VectorField`] contract.
struct TangentFlow<'a, F> {
    field: &'a F,
    dim: usize,
    cols: usize,
    eps: f64,
    scratch: RefCell<JacobianScratch>,
}

impl<'a, F: VectorField> TangentFlow<'a, F> {
    fn new(field: &'a F, dim: usize, cols: usize, eps: f64) -> Self {
        Self {
            field,
            dim,
            cols,
            eps,
            scratch: RefCell::new(JacobianScratch {
                perturbed: vec![0.0; dim],
                f_plus: vec![0.0; dim],
                f_minus: vec![0.0; dim],
                jacobian: vec![0.0; dim * dim],
            }),
        }
    }
}

impl<F: VectorField> VectorField for TangentFlow<'_, F> {
    fn dimension(&self) -> usize {
        self.dim + self.dim * self.cols
    }

    fn eval(&self, t: f64, state: &[f64], out: &mut [f64]) {
        let n = self.dim;
        self.field.eval(t, &state[..n], &mut out[..n]);

        let mut scratch = self.scratch.borrow_mut();
        let scratch = &mut *scratch;

        // Central-difference Jacobian, one column per perturbed coordinate.
        scratch.perturbed.copy_from_slice(&state[..n]);
        for j in 0..n {
            let original = scratch.perturbed[j];
            scratch.perturbed[j] = original + self.eps;
            self.field.eval(t, &scratch.perturbed, &mut scratch.f_plus);
            scratch.perturbed[j] = original - self.eps;
            self.field.eval(t, &scratch.perturbed, &mut scratch.f_minus);
            scratch.perturbed[j] = original;
            for i in 0..n {
                scratch.jacobian[i * n + j] =
                    (scratch.f_plus[i] - scratch.f_minus[i]) / (2.0 * self.eps);
            }
        }

        // dΦ/dt = J·Φ, column by column.
        let k = self.cols;
        for i in 0..n {
            for j in 0..k {
                let mut sum = 0.0;
                for m in 0..n {
                    sum += scratch.jacobian[i * n + m] * state[n + m * k + j];
                }
                out[n + i * k + j] = sum;
            }
        }
    }
}

fn ensure_finite_augmented(augmented: &[f64], dim: usize, t: f64) -> Result<()> {
    if augmented[..dim].iter().any(|v| !v.is_finite()) {
        return Err(CascadeError::divergence(t, "non-finite value in state"));
    }
    if augmented[dim..].iter().any(|v| !v.is_finite()) {
        return Err(CascadeError::divergence(
            t,
            "non-finite value in tangent vector",
        ));
    }
    Ok(())
}

/// Draws a unit-norm tangent direction. Components are uniform in [-1, 1];
/// a near-zero draw is resampled.
fn random_unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f64> {
    loop {
        let v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-8 {
            return v.into_iter().map(|x| x / norm).collect();
        }
    }
}

/// Estimates the largest Lyapunov exponent of `field` along the trajectory
/// from `initial_state`.
///
/// One tangent vector, initialized to a random unit direction (seeded when
/// `seed` is given, entropy otherwise), rides the linearized flow; every
/// `renorm_interval` steps it is rescaled to unit length and, past the
/// transient, `ln(norm)` is accumulated. The estimate is the accumulated
/// sum divided by the measured time span. If no renormalization completes
/// past the transient the result is exactly `0.0` — a documented
/// degenerate-input behavior, not an error.
pub fn lyapunov_max(
    field: &impl VectorField,
    initial_state: &[f64],
    settings: &LyapunovSettings,
    seed: Option<u64>,
) -> Result<f64> {
    let dim = settings.validate(field, initial_state)?;

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let direction = random_unit_vector(&mut rng, dim);

    let mut augmented = vec![0.0; dim + dim];
    augmented[..dim].copy_from_slice(initial_state);
    augmented[dim..].copy_from_slice(&direction);

    let flow = TangentFlow::new(field, dim, 1, settings.jacobian_step);
    let mut stepper = settings.stepper.build(flow.dimension());

    let total_steps = (settings.total_time / settings.dt) as usize;
    let transient_steps = (settings.transient_time / settings.dt) as usize;

    let mut t = 0.0;
    let mut log_sum = 0.0;
    let mut renorms_counted = 0usize;

    for step in 1..=total_steps {
        stepper.step(&flow, &mut t, &mut augmented, settings.dt);

        if step % settings.renorm_interval == 0 {
            ensure_finite_augmented(&augmented, dim, t)?;
            let norm = augmented[dim..].iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= f64::MIN_POSITIVE {
                return Err(CascadeError::divergence(t, "tangent vector norm collapsed"));
            }
            for v in &mut augmented[dim..] {
                *v /= norm;
            }
            if step > transient_steps {
                log_sum += norm.ln();
                renorms_counted += 1;
            }
        }
    }
    ensure_finite_augmented(&augmented, dim, t)?;

    if renorms_counted == 0 {
        return Ok(0.0);
    }
    Ok(log_sum / (renorms_counted as f64 * settings.renorm_interval as f64 * settings.dt))
}

/// Estimates the full Lyapunov spectrum of `field` along the trajectory
/// from `initial_state`.
///
/// An n×n orthonormal tangent basis (initialized to identity) rides the
/// linearized flow; every `renorm_interval` steps a QR factorization
/// restores orthogonality, Q becoming the new basis, and past the
/// transient `ln|R[i][i]|` accumulates per direction. The result is sorted
/// descending. Zero counted renormalizations yield an all-zero spectrum,
/// the same degenerate-input behavior as [`lyapunov_max`].
pub fn lyapunov_spectrum(
    field: &impl VectorField,
    initial_state: &[f64],
    settings: &LyapunovSettings,
) -> Result<Vec<f64>> {
    let dim = settings.validate(field, initial_state)?;

    let mut augmented = vec![0.0; dim + dim * dim];
    augmented[..dim].copy_from_slice(initial_state);
    for i in 0..dim {
        augmented[dim + i * dim + i] = 1.0;
    }

    let flow = TangentFlow::new(field, dim, dim, settings.jacobian_step);
    let mut stepper = settings.stepper.build(flow.dimension());

    let total_steps = (settings.total_time / settings.dt) as usize;
    let transient_steps = (settings.transient_time / settings.dt) as usize;

    let mut t = 0.0;
    let mut log_sums = vec![0.0; dim];
    let mut renorms_counted = 0usize;

    for step in 1..=total_steps {
        stepper.step(&flow, &mut t, &mut augmented, settings.dt);

        if step % settings.renorm_interval == 0 {
            ensure_finite_augmented(&augmented, dim, t)?;
            let accumulate = step > transient_steps;
            reorthonormalize(&mut augmented[dim..], dim, t, accumulate.then_some(&mut log_sums))?;
            if accumulate {
                renorms_counted += 1;
            }
        }
    }
    ensure_finite_augmented(&augmented, dim, t)?;

    if renorms_counted == 0 {
        return Ok(vec![0.0; dim]);
    }

    let scale = renorms_counted as f64 * settings.renorm_interval as f64 * settings.dt;
    let mut spectrum: Vec<f64> = log_sums.iter().map(|s| s / scale).collect();
    spectrum.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Ok(spectrum)
}

/// QR-factorizes the row-major tangent block in place: Q replaces the
/// block, and when `log_sums` is supplied, `ln|R[i][i]|` is added per
/// direction. nalgebra stores column-major, so Q is written back element
/// by element to preserve the row-major layout.
fn reorthonormalize(
    phi: &mut [f64],
    dim: usize,
    t: f64,
    log_sums: Option<&mut Vec<f64>>,
) -> Result<()> {
    let matrix = DMatrix::from_row_slice(dim, dim, phi);
    let qr = QR::new(matrix);
    let (q, r) = qr.unpack();

    if let Some(sums) = log_sums {
        for i in 0..dim {
            let diag = r[(i, i)].abs();
            if diag <= f64::MIN_POSITIVE {
                return Err(CascadeError::divergence(
                    t,
                    "near-singular R diagonal during orthonormalization",
                ));
            }
            sums[i] += diag.ln();
        }
    }

    for i in 0..dim {
        for j in 0..dim {
            phi[i * dim + j] = q[(i, j)];
        }
    }
    Ok(())
}
