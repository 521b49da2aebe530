/// Right-hand side of a first-order ODE system dx/dt = f(t, x).
///
/// Implementations must be pure: side-effect-free and safe to call at
/// arbitrary (t, state) pairs, including the perturbed states used for
/// finite-difference Jacobian estimation. Parameters live as fields of the
/// implementing type, so one value is one immutable parameter snapshot.
pub trait VectorField {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// state: current state
    /// out: buffer to write the derivative into
    fn eval(&self, t: f64, state: &[f64], out: &mut [f64]);
}

/// A trait for solvers that can step a system forward in time.
pub trait Steppable {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64);
}

/// Adapts a closure into a [`VectorField`], for ad-hoc systems that do not
/// warrant a named struct.
pub struct FnField<F> {
    dim: usize,
    f: F,
}

impl<F> FnField<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> VectorField for FnField<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    fn dimension(&self) -> usize {
        self.dim
    }

    fn eval(&self, t: f64, state: &[f64], out: &mut [f64]) {
        (self.f)(t, state, out)
    }
}
