//! Bifurcation diagrams over a swept parameter.
//!
//! The caller supplies a factory closure mapping a parameter value to a
//! fresh vector-field snapshot, so every sweep iteration owns an immutable
//! parameter set and the caller's base system is never touched. Per value:
//! burn off a transient, integrate a sampling window at fixed-interval
//! output, then record either a raw coordinate column or Poincaré-crossing
//! values. One diverging parameter value records an empty sample array and
//! the sweep continues.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CascadeError, Result};
use crate::lyapunov::{lyapunov_max, LyapunovSettings};
use crate::poincare::{poincare_section, SectionConfig};
use crate::trajectory::{integrate_final, integrate_sampled, StepControl, Trajectory};
use crate::traits::VectorField;

/// What to record from each sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleSource {
    /// Every sampled value of one coordinate.
    Coordinate(usize),
    /// Poincaré-crossing values of coordinate `record` (indexed in the full
    /// state, not the reduced crossing point).
    Section {
        config: SectionConfig,
        record: usize,
    },
}

/// Initial state policy across the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepStart {
    /// Every parameter value starts from the caller's initial state.
    FixedInitial,
    /// Each value starts from the previous value's final sampled state; a
    /// failed value carries the last good state forward. Shortens the
    /// transient needed when the attractor deforms slowly with the
    /// parameter, at the cost of hysteresis near subcritical transitions.
    Continuation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Inclusive parameter range, swept low to high.
    pub param_range: (f64, f64),
    /// Number of swept values, evenly spaced over the range.
    pub param_steps: usize,
    /// Span integrated and discarded before sampling begins.
    pub transient_time: f64,
    /// Span of the fixed-interval sampling window.
    pub sample_time: f64,
    /// Output interval within the sampling window.
    pub sample_dt: f64,
    pub control: StepControl,
    pub start: SweepStart,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            param_range: (0.0, 1.0),
            param_steps: 200,
            transient_time: 50.0,
            sample_time: 50.0,
            sample_dt: 0.01,
            control: StepControl::default(),
            start: SweepStart::FixedInitial,
        }
    }
}

impl SweepSettings {
    fn validate(&self) -> Result<()> {
        if self.param_steps == 0 {
            return Err(CascadeError::invalid(
                "Parameter sweep needs at least one value.",
            ));
        }
        if !self.param_range.0.is_finite() || !self.param_range.1.is_finite() {
            return Err(CascadeError::invalid("Parameter range must be finite."));
        }
        if !self.transient_time.is_finite() || self.transient_time <= 0.0 {
            return Err(CascadeError::invalid("Transient time must be positive."));
        }
        if !self.sample_time.is_finite() || self.sample_time <= 0.0 {
            return Err(CascadeError::invalid("Sample time must be positive."));
        }
        if !self.sample_dt.is_finite() || self.sample_dt <= 0.0 {
            return Err(CascadeError::invalid("Sample interval must be positive."));
        }
        self.control.validate()
    }

    fn values(&self) -> Vec<f64> {
        let (lo, hi) = self.param_range;
        if self.param_steps == 1 {
            return vec![lo];
        }
        let step = (hi - lo) / (self.param_steps - 1) as f64;
        (0..self.param_steps).map(|i| lo + i as f64 * step).collect()
    }
}

/// Result of one parameter sweep: `samples[i]` is the (possibly empty)
/// sample set recorded at `parameters[i]`.
#[derive(Debug, Clone, Serialize)]
pub struct BifurcationDiagram {
    pub parameters: Vec<f64>,
    pub samples: Vec<Vec<f64>>,
}

fn validate_source(source: &SampleSource, dim: usize) -> Result<()> {
    match *source {
        SampleSource::Coordinate(coord) => {
            if coord >= dim {
                return Err(CascadeError::invalid(format!(
                    "Sample coordinate {coord} out of range for dimension {dim}."
                )));
            }
        }
        SampleSource::Section { ref config, record } => {
            config.validate(dim)?;
            if record >= dim {
                return Err(CascadeError::invalid(format!(
                    "Recorded coordinate {record} out of range for dimension {dim}."
                )));
            }
            if record == config.plane_coord {
                return Err(CascadeError::invalid(
                    "Recorded coordinate must differ from the section plane coordinate.",
                ));
            }
        }
    }
    Ok(())
}

fn extract_samples(trajectory: &Trajectory, source: &SampleSource) -> Result<Vec<f64>> {
    match *source {
        SampleSource::Coordinate(coord) => trajectory.coordinate(coord),
        SampleSource::Section { ref config, record } => {
            // Crossing points drop the plane coordinate, shifting the
            // indices above it down by one.
            let reduced = if record < config.plane_coord {
                record
            } else {
                record - 1
            };
            let crossings = poincare_section(trajectory, config)?;
            Ok(crossings.iter().map(|c| c.point[reduced]).collect())
        }
    }
}

/// Sweeps a parameter and records the long-term sample set at each value.
///
/// `factory` builds an immutable field snapshot per value. A value whose
/// integration diverges records an empty sample array and the sweep
/// continues; after eager validation, the sweep itself never fails.
/// Progress is logged at coarse intervals since this loop dominates the
/// cost of a diagram.
pub fn bifurcation_diagram<V: VectorField>(
    factory: impl Fn(f64) -> V,
    initial_state: &[f64],
    source: &SampleSource,
    settings: &SweepSettings,
) -> Result<BifurcationDiagram> {
    settings.validate()?;

    let probe = factory(settings.param_range.0);
    let dim = probe.dimension();
    if initial_state.len() != dim {
        return Err(CascadeError::invalid(format!(
            "Initial state has dimension {}, but the vector field expects {}.",
            initial_state.len(),
            dim
        )));
    }
    validate_source(source, dim)?;

    let parameters = settings.values();
    let mut samples = Vec::with_capacity(parameters.len());
    let mut start_state = initial_state.to_vec();
    let progress_stride = (parameters.len() / 10).max(1);

    for (i, &param) in parameters.iter().enumerate() {
        let field = factory(param);
        let recorded = run_one_value(&field, &start_state, source, settings);
        match recorded {
            Ok((values, end_state)) => {
                if settings.start == SweepStart::Continuation {
                    start_state = end_state;
                }
                samples.push(values);
            }
            Err(err) => {
                warn!(parameter = param, error = %err, "sweep value diverged; recording empty sample set");
                samples.push(Vec::new());
            }
        }

        if (i + 1) % progress_stride == 0 || i + 1 == parameters.len() {
            info!(
                completed = i + 1,
                total = parameters.len(),
                parameter = param,
                "bifurcation sweep progress"
            );
        }
    }

    Ok(BifurcationDiagram { parameters, samples })
}

fn run_one_value(
    field: &impl VectorField,
    start_state: &[f64],
    source: &SampleSource,
    settings: &SweepSettings,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let settled = integrate_final(
        field,
        start_state,
        (0.0, settings.transient_time),
        settings.control,
    )?;
    let trajectory = integrate_sampled(
        field,
        &settled,
        (0.0, settings.sample_time),
        settings.sample_dt,
        settings.control,
    )?;
    let values = extract_samples(&trajectory, source)?;
    let end_state = trajectory
        .last_state()
        .map(<[f64]>::to_vec)
        .unwrap_or(settled);
    Ok((values, end_state))
}

/// Largest-exponent curve λ₁(p) over a swept parameter.
///
/// Shares the per-value isolation of [`bifurcation_diagram`]: a value whose
/// exponent computation diverges records `f64::NAN` and the sweep
/// continues. The same seed is used at every value so the curve varies
/// only with the parameter.
pub fn lyapunov_sweep<V: VectorField>(
    factory: impl Fn(f64) -> V,
    initial_state: &[f64],
    settings: &LyapunovSettings,
    param_range: (f64, f64),
    param_steps: usize,
    seed: Option<u64>,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if param_steps == 0 {
        return Err(CascadeError::invalid(
            "Parameter sweep needs at least one value.",
        ));
    }
    if !param_range.0.is_finite() || !param_range.1.is_finite() {
        return Err(CascadeError::invalid("Parameter range must be finite."));
    }
    // Surface configuration errors once, eagerly, instead of as a sweep
    // full of NaNs.
    {
        let probe = factory(param_range.0);
        if initial_state.len() != probe.dimension() {
            return Err(CascadeError::invalid(format!(
                "Initial state has dimension {}, but the vector field expects {}.",
                initial_state.len(),
                probe.dimension()
            )));
        }
    }

    let parameters: Vec<f64> = if param_steps == 1 {
        vec![param_range.0]
    } else {
        let step = (param_range.1 - param_range.0) / (param_steps - 1) as f64;
        (0..param_steps)
            .map(|i| param_range.0 + i as f64 * step)
            .collect()
    };

    let progress_stride = (parameters.len() / 10).max(1);
    let mut lambdas = Vec::with_capacity(parameters.len());
    for (i, &param) in parameters.iter().enumerate() {
        let field = factory(param);
        match lyapunov_max(&field, initial_state, settings, seed) {
            Ok(lambda) => lambdas.push(lambda),
            Err(err) => {
                warn!(parameter = param, error = %err, "exponent sweep value failed; recording NaN");
                lambdas.push(f64::NAN);
            }
        }
        if (i + 1) % progress_stride == 0 || i + 1 == parameters.len() {
            info!(completed = i + 1, total = parameters.len(), "lyapunov sweep progress");
        }
    }

    Ok((parameters, lambdas))
}

/// Chaos-onset estimates: parameter values where a λ₁(p) curve crosses
/// zero, located by linear interpolation between adjacent finite samples.
pub fn chaos_thresholds(parameters: &[f64], lambdas: &[f64]) -> Vec<f64> {
    let mut thresholds = Vec::new();
    let len = parameters.len().min(lambdas.len());
    for i in 1..len {
        let (l1, l2) = (lambdas[i - 1], lambdas[i]);
        if !l1.is_finite() || !l2.is_finite() {
            continue;
        }
        if l1 == 0.0 {
            thresholds.push(parameters[i - 1]);
        } else if l1 * l2 < 0.0 {
            let s = -l1 / (l2 - l1);
            thresholds.push(parameters[i - 1] + s * (parameters[i] - parameters[i - 1]));
        } else if l2 == 0.0 && i + 1 == len {
            // An exact zero on the final sample has no following window to
            // claim it as its leading value.
            thresholds.push(parameters[i]);
        }
    }
    thresholds
}
