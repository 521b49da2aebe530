//! The `cascade_core` crate is the numerical engine for Cascade's chaotic
//! dynamics analysis. It is a pure computational API: callers get structured
//! data (trajectories, section points, exponents, parameter sweeps) and are
//! responsible for any plotting or persistence.
//!
//! Key components:
//! - **Traits**: `VectorField` (ODE right-hand sides), `Steppable` (solvers),
//!   `FnField` (closure adapter).
//! - **Solvers**: RK4 (fixed step) and Tsit5 (fixed step plus an embedded
//!   error estimate for adaptive control).
//! - **Trajectory**: adaptive/fixed integration with natural, fixed-interval,
//!   or final-state-only output.
//! - **Poincare**: hyperplane crossing extraction with interpolation.
//! - **Lyapunov**: largest exponent and full spectrum by tangent-flow
//!   propagation with QR re-orthonormalization.
//! - **Bifurcation**: parameter sweeps over immutable field snapshots.
//! - **Analysis**: divergence curves, return maps, delay embeddings, and
//!   summary diagnostics.

pub mod analysis;
pub mod bifurcation;
pub mod error;
pub mod lyapunov;
pub mod poincare;
pub mod solvers;
pub mod systems;
pub mod trajectory;
pub mod traits;

pub use error::{CascadeError, Result};
