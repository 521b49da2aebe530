use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::solvers::{Tsit5, RK4};
use crate::traits::{Steppable, VectorField};

/// Hard ceiling on internal steps per integration run, counting rejected
/// adaptive trials. Hitting it is reported as divergence, not silence.
const MAX_STEPS: usize = 50_000_000;
/// Floor below which a shrinking adaptive step is considered collapsed.
const MIN_STEP: f64 = 1e-12;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
// The embedded estimate is order 4, so the controller exponent is 1/(4+1).
const ERROR_EXPONENT: f64 = -1.0 / 5.0;

/// Step-size policy for an integration run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum StepControl {
    /// Classic RK4 at a constant step; bit-reproducible and cheap for bulk
    /// trajectory generation.
    Fixed { dt: f64 },
    /// Tsit5 with the embedded error estimate; the step adapts to hold the
    /// scaled local error at or below 1.
    Adaptive { rtol: f64, atol: f64 },
}

impl Default for StepControl {
    fn default() -> Self {
        StepControl::Adaptive {
            rtol: 1e-8,
            atol: 1e-10,
        }
    }
}

impl StepControl {
    pub fn fixed(dt: f64) -> Self {
        StepControl::Fixed { dt }
    }

    pub fn adaptive(rtol: f64, atol: f64) -> Self {
        StepControl::Adaptive { rtol, atol }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match *self {
            StepControl::Fixed { dt } => {
                if !dt.is_finite() || dt <= 0.0 {
                    return Err(CascadeError::invalid(
                        "Fixed step size must be positive and finite.",
                    ));
                }
            }
            StepControl::Adaptive { rtol, atol } => {
                if !rtol.is_finite() || rtol <= 0.0 || !atol.is_finite() || atol <= 0.0 {
                    return Err(CascadeError::invalid(
                        "Tolerances must be positive and finite.",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// An immutable, time-ordered sequence of states from one integration run.
///
/// States are stored flat in row-major order, so
/// `states.len() == times.len() * dim`.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    dim: usize,
    times: Vec<f64>,
    states: Vec<f64>,
}

impl Trajectory {
    /// Builds a trajectory from raw parts, validating the shape. Useful for
    /// feeding externally produced (or analytically constructed) sample
    /// sequences into the section extractor.
    pub fn from_parts(dim: usize, times: Vec<f64>, states: Vec<f64>) -> Result<Self> {
        if dim == 0 {
            return Err(CascadeError::invalid(
                "Trajectory dimension must be positive.",
            ));
        }
        if states.len() != times.len() * dim {
            return Err(CascadeError::invalid(format!(
                "Trajectory shape mismatch: {} states for {} times at dimension {}.",
                states.len(),
                times.len(),
                dim
            )));
        }
        Ok(Self { dim, times, states })
    }

    fn with_capacity(dim: usize, points: usize) -> Self {
        Self {
            dim,
            times: Vec::with_capacity(points),
            states: Vec::with_capacity(points * dim),
        }
    }

    fn push(&mut self, t: f64, state: &[f64]) {
        self.times.push(t);
        self.states.extend_from_slice(state);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn time(&self, idx: usize) -> f64 {
        self.times[idx]
    }

    pub fn state(&self, idx: usize) -> &[f64] {
        &self.states[idx * self.dim..(idx + 1) * self.dim]
    }

    pub fn last_state(&self) -> Option<&[f64]> {
        if self.is_empty() {
            None
        } else {
            Some(self.state(self.len() - 1))
        }
    }

    /// Copies out one coordinate as a column.
    pub fn coordinate(&self, coord: usize) -> Result<Vec<f64>> {
        if coord >= self.dim {
            return Err(CascadeError::invalid(format!(
                "Coordinate index {} out of range for dimension {}.",
                coord, self.dim
            )));
        }
        Ok((0..self.len()).map(|i| self.state(i)[coord]).collect())
    }

    /// Flat row-major state storage, for consumers that serialize or plot.
    pub fn flat_states(&self) -> &[f64] {
        &self.states
    }
}

enum Engine {
    Fixed {
        stepper: RK4,
        dt: f64,
    },
    Adaptive {
        stepper: Tsit5,
        rtol: f64,
        atol: f64,
        h: f64,
        candidate: Vec<f64>,
    },
}

impl Engine {
    fn new(control: StepControl, dim: usize, span: f64) -> Self {
        match control {
            StepControl::Fixed { dt } => Engine::Fixed {
                stepper: RK4::new(dim),
                dt,
            },
            StepControl::Adaptive { rtol, atol } => Engine::Adaptive {
                stepper: Tsit5::new(dim),
                rtol,
                atol,
                h: (span * 1e-4).max(1e-6).min(span),
                candidate: vec![0.0; dim],
            },
        }
    }

    /// Advances by exactly one accepted step, clamped so it never passes
    /// `limit`. When the step lands on `limit`, `t` snaps to it exactly.
    fn single_step(
        &mut self,
        field: &impl VectorField,
        t: &mut f64,
        state: &mut [f64],
        limit: f64,
        steps: &mut usize,
    ) -> Result<()> {
        match self {
            Engine::Fixed { stepper, dt } => {
                let to_limit = limit - *t;
                // Stretch the final step onto the limit instead of leaving a
                // dust-sized remainder behind.
                let (h, landing) = if to_limit <= *dt * (1.0 + 1e-6) {
                    (to_limit, true)
                } else {
                    (*dt, false)
                };
                stepper.step(field, t, state, h);
                if landing {
                    *t = limit;
                }
                *steps += 1;
                if *steps > MAX_STEPS {
                    return Err(step_budget_exhausted(*t));
                }
                ensure_finite_state(state, *t)
            }
            Engine::Adaptive {
                stepper,
                rtol,
                atol,
                h,
                candidate,
            } => {
                let to_limit = limit - *t;
                loop {
                    let (h_eff, landing) = if *h >= to_limit {
                        (to_limit, true)
                    } else {
                        (*h, false)
                    };

                    let err = stepper.trial_step(field, *t, state, h_eff, candidate, *rtol, *atol);
                    *steps += 1;
                    if *steps > MAX_STEPS {
                        return Err(step_budget_exhausted(*t));
                    }

                    if err.is_finite() && err <= 1.0 {
                        state.copy_from_slice(candidate);
                        *t = if landing { limit } else { *t + h_eff };
                        ensure_finite_state(state, *t)?;
                        let factor = (SAFETY * err.powf(ERROR_EXPONENT)).clamp(MIN_FACTOR, MAX_FACTOR);
                        let grown = h_eff * factor;
                        // A step clamped by the limit says nothing about the
                        // natural step size, so never shrink the proposal there.
                        *h = if landing { h.max(grown) } else { grown };
                        return Ok(());
                    }

                    let factor = if err.is_finite() {
                        (SAFETY * err.powf(ERROR_EXPONENT)).clamp(MIN_FACTOR, MAX_FACTOR)
                    } else {
                        MIN_FACTOR
                    };
                    let shrunk = h_eff * factor;
                    if shrunk < MIN_STEP {
                        return Err(CascadeError::divergence(
                            *t,
                            format!("step size collapsed below {MIN_STEP:e} without meeting tolerances"),
                        ));
                    }
                    *h = shrunk;
                }
            }
        }
    }
}

fn step_budget_exhausted(t: f64) -> CascadeError {
    CascadeError::divergence(t, format!("exceeded {MAX_STEPS} internal steps"))
}

fn ensure_finite_state(state: &[f64], t: f64) -> Result<()> {
    if state.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CascadeError::divergence(t, "non-finite value in state"))
    }
}

fn validate_run(
    field: &impl VectorField,
    initial_state: &[f64],
    t_span: (f64, f64),
) -> Result<usize> {
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
    if !t_span.0.is_finite() || !t_span.1.is_finite() {
        return Err(CascadeError::invalid("Time span must be finite."));
    }
    if t_span.1 <= t_span.0 {
        return Err(CascadeError::invalid("Time span must satisfy t1 > t0."));
    }
    if initial_state.iter().any(|v| !v.is_finite()) {
        return Err(CascadeError::invalid(
            "Initial state contains non-finite values.",
        ));
    }
    Ok(dim)
}

/// Integrates `field` over `t_span`, recording every accepted step
/// (including the initial state). Fixed control records evenly spaced
/// points; adaptive control records the solver's natural step points.
pub fn integrate(
    field: &impl VectorField,
    initial_state: &[f64],
    t_span: (f64, f64),
    control: StepControl,
) -> Result<Trajectory> {
    let dim = validate_run(field, initial_state, t_span)?;
    control.validate()?;

    let (t0, t1) = t_span;
    let mut engine = Engine::new(control, dim, t1 - t0);
    let mut t = t0;
    let mut state = initial_state.to_vec();
    let mut steps = 0usize;

    let mut trajectory = Trajectory::with_capacity(dim, 64);
    trajectory.push(t, &state);
    while t < t1 {
        engine.single_step(field, &mut t, &mut state, t1, &mut steps)?;
        trajectory.push(t, &state);
    }
    Ok(trajectory)
}

/// Integrates `field` over `t_span`, recording states at the evenly spaced
/// times `t0 + i * sample_dt` (half-open: the end time itself is excluded),
/// regardless of the internal step size. The sample times are hit exactly;
/// internal steps clamp onto each target.
pub fn integrate_sampled(
    field: &impl VectorField,
    initial_state: &[f64],
    t_span: (f64, f64),
    sample_dt: f64,
    control: StepControl,
) -> Result<Trajectory> {
    let dim = validate_run(field, initial_state, t_span)?;
    control.validate()?;
    if !sample_dt.is_finite() || sample_dt <= 0.0 {
        return Err(CascadeError::invalid(
            "Sample interval must be positive and finite.",
        ));
    }

    let (t0, t1) = t_span;
    let span = t1 - t0;
    let count = (span / sample_dt - 1e-9).ceil().max(1.0) as usize;

    let mut engine = Engine::new(control, dim, span);
    let mut t = t0;
    let mut state = initial_state.to_vec();
    let mut steps = 0usize;

    let mut trajectory = Trajectory::with_capacity(dim, count);
    trajectory.push(t, &state);
    for i in 1..count {
        let target = t0 + i as f64 * sample_dt;
        while t < target {
            engine.single_step(field, &mut t, &mut state, target, &mut steps)?;
        }
        trajectory.push(t, &state);
    }
    Ok(trajectory)
}

/// Integrates `field` over `t_span` and returns only the final state.
/// Used to burn off transients without retaining the path.
pub fn integrate_final(
    field: &impl VectorField,
    initial_state: &[f64],
    t_span: (f64, f64),
    control: StepControl,
) -> Result<Vec<f64>> {
    let dim = validate_run(field, initial_state, t_span)?;
    control.validate()?;

    let (t0, t1) = t_span;
    let mut engine = Engine::new(control, dim, t1 - t0);
    let mut t = t0;
    let mut state = initial_state.to_vec();
    let mut steps = 0usize;

    while t < t1 {
        engine.single_step(field, &mut t, &mut state, t1, &mut steps)?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::{integrate, integrate_final, integrate_sampled, StepControl, Trajectory};
    use crate::error::{CascadeError, Result};
    use crate::systems::Lorenz;
    use crate::traits::FnField;

    fn oscillator() -> FnField<impl Fn(f64, &[f64], &mut [f64])> {
        FnField::new(2, |_t, x: &[f64], out: &mut [f64]| {
            out[0] = x[1];
            out[1] = -x[0];
        })
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn fixed_step_integration_is_deterministic() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();
        let control = StepControl::fixed(0.01);

        let a = integrate(&system, &y0, (0.0, 1.0), control).unwrap();
        let b = integrate(&system, &y0, (0.0, 1.0), control).unwrap();

        assert_eq!(a.times(), b.times());
        assert_eq!(a.flat_states(), b.flat_states());
    }

    #[test]
    fn integrate_records_initial_point_and_lands_on_the_end_time() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();

        let traj = integrate(&system, &y0, (0.0, 1.0), StepControl::fixed(0.01)).unwrap();
        assert_eq!(traj.time(0), 0.0);
        assert_eq!(traj.state(0), &y0);
        assert_eq!(traj.time(traj.len() - 1), 1.0);
        assert_eq!(traj.len(), 101);
    }

    #[test]
    fn adaptive_integration_matches_the_analytic_oscillator() {
        let field = oscillator();
        let span = (0.0, 2.0 * std::f64::consts::PI);
        let traj = integrate(&field, &[1.0, 0.0], span, StepControl::default()).unwrap();

        let last = traj.last_state().unwrap();
        assert!((last[0] - 1.0).abs() < 1e-6);
        assert!(last[1].abs() < 1e-6);
    }

    #[test]
    fn sampled_output_times_are_exact() {
        let field = oscillator();
        let traj =
            integrate_sampled(&field, &[1.0, 0.0], (0.0, 0.5), 0.1, StepControl::default())
                .unwrap();

        assert_eq!(traj.len(), 5);
        for i in 0..traj.len() {
            assert_eq!(traj.time(i), i as f64 * 0.1);
            let expected = (traj.time(i)).cos();
            assert!((traj.state(i)[0] - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn sampled_output_spans_shorter_than_one_interval_keep_the_initial_point() {
        let field = oscillator();
        let traj =
            integrate_sampled(&field, &[1.0, 0.0], (0.0, 0.05), 0.1, StepControl::default())
                .unwrap();
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.time(0), 0.0);
    }

    #[test]
    fn integrate_final_matches_the_full_trajectory() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();
        let control = StepControl::fixed(0.005);

        let traj = integrate(&system, &y0, (0.0, 2.0), control).unwrap();
        let final_state = integrate_final(&system, &y0, (0.0, 2.0), control).unwrap();

        assert_eq!(traj.last_state().unwrap(), final_state.as_slice());
    }

    #[test]
    fn blowup_is_reported_as_divergence() {
        // dy/dt = y^2 from y(0) = 1 blows up at t = 1.
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = x[0] * x[0]);

        let adaptive = integrate(&field, &[1.0], (0.0, 2.0), StepControl::default());
        assert!(matches!(
            adaptive,
            Err(CascadeError::NumericalDivergence { .. })
        ));

        let fixed = integrate(&field, &[1.0], (0.0, 2.0), StepControl::fixed(0.01));
        assert!(matches!(
            fixed,
            Err(CascadeError::NumericalDivergence { .. })
        ));
    }

    #[test]
    fn invalid_runs_are_rejected_eagerly() {
        let system = Lorenz::default();
        let y0 = Lorenz::default_initial_state();

        assert_err_contains(
            integrate(&system, &y0, (1.0, 1.0), StepControl::default()),
            "t1 > t0",
        );
        assert_err_contains(
            integrate(&system, &[1.0, 1.0], (0.0, 1.0), StepControl::default()),
            "dimension",
        );
        assert_err_contains(
            integrate(&system, &y0, (0.0, 1.0), StepControl::fixed(0.0)),
            "Fixed step size",
        );
        assert_err_contains(
            integrate(&system, &y0, (0.0, 1.0), StepControl::adaptive(1e-8, 0.0)),
            "Tolerances",
        );
        assert_err_contains(
            integrate_sampled(&system, &y0, (0.0, 1.0), -0.1, StepControl::default()),
            "Sample interval",
        );
        assert_err_contains(
            integrate(&system, &[1.0, f64::NAN, 1.0], (0.0, 1.0), StepControl::default()),
            "non-finite",
        );
    }

    #[test]
    fn trajectory_from_parts_validates_shape() {
        assert!(Trajectory::from_parts(2, vec![0.0, 0.1], vec![1.0, 2.0, 3.0, 4.0]).is_ok());
        assert_err_contains(
            Trajectory::from_parts(2, vec![0.0, 0.1], vec![1.0, 2.0, 3.0]),
            "shape mismatch",
        );
        assert_err_contains(
            Trajectory::from_parts(0, vec![], vec![]),
            "dimension must be positive",
        );
    }

    #[test]
    fn coordinate_extraction() {
        let traj = Trajectory::from_parts(
            2,
            vec![0.0, 0.1, 0.2],
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0],
        )
        .unwrap();
        assert_eq!(traj.coordinate(1).unwrap(), vec![10.0, 20.0, 30.0]);
        assert_err_contains(traj.coordinate(2), "out of range");
    }
}
