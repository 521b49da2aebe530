//! Named attractor systems with literature-standard parameters.
//!
//! Each system is a plain struct of `f64` parameters implementing
//! [`VectorField`]; sweeping a parameter means constructing a fresh value
//! (e.g. `Rossler { c, ..base }`), never mutating a shared one.

use serde::{Deserialize, Serialize};

use crate::traits::VectorField;

/// The Lorenz system:
///   dx/dt = sigma * (y - x)
///   dy/dt = x * (rho - z) - y
///   dz/dt = x * y - beta * z
/// Chaotic at the classic parameters (10, 28, 8/3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lorenz {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for Lorenz {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl Lorenz {
    /// A point near the attractor.
    pub fn default_initial_state() -> [f64; 3] {
        [1.0, 1.0, 1.0]
    }
}

impl VectorField for Lorenz {
    fn dimension(&self) -> usize {
        3
    }

    fn eval(&self, _t: f64, state: &[f64], out: &mut [f64]) {
        let (x, y, z) = (state[0], state[1], state[2]);
        out[0] = self.sigma * (y - x);
        out[1] = x * (self.rho - z) - y;
        out[2] = x * y - self.beta * z;
    }
}

/// The Rössler system; `c` is the usual period-doubling control parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rossler {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for Rossler {
    fn default() -> Self {
        Self {
            a: 0.2,
            b: 0.2,
            c: 5.7,
        }
    }
}

impl Rossler {
    pub fn default_initial_state() -> [f64; 3] {
        [1.0, 1.0, 1.0]
    }
}

impl VectorField for Rossler {
    fn dimension(&self) -> usize {
        3
    }

    fn eval(&self, _t: f64, state: &[f64], out: &mut [f64]) {
        let (x, y, z) = (state[0], state[1], state[2]);
        out[0] = -y - z;
        out[1] = x + self.a * y;
        out[2] = self.b + z * (x - self.c);
    }
}

/// Thomas' cyclically symmetric attractor, chaotic near b = 0.208186.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thomas {
    pub b: f64,
}

impl Default for Thomas {
    fn default() -> Self {
        Self { b: 0.208186 }
    }
}

impl Thomas {
    pub fn default_initial_state() -> [f64; 3] {
        [0.1, 0.0, 0.0]
    }
}

impl VectorField for Thomas {
    fn dimension(&self) -> usize {
        3
    }

    fn eval(&self, _t: f64, state: &[f64], out: &mut [f64]) {
        let (x, y, z) = (state[0], state[1], state[2]);
        out[0] = y.sin() - self.b * x;
        out[1] = z.sin() - self.b * y;
        out[2] = x.sin() - self.b * z;
    }
}

/// The Aizawa attractor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aizawa {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Aizawa {
    fn default() -> Self {
        Self {
            a: 0.95,
            b: 0.7,
            c: 0.6,
            d: 3.5,
            e: 0.25,
            f: 0.1,
        }
    }
}

impl Aizawa {
    pub fn default_initial_state() -> [f64; 3] {
        [0.1, 0.0, 0.0]
    }
}

impl VectorField for Aizawa {
    fn dimension(&self) -> usize {
        3
    }

    fn eval(&self, _t: f64, state: &[f64], out: &mut [f64]) {
        let (x, y, z) = (state[0], state[1], state[2]);
        out[0] = (z - self.b) * x - self.d * y;
        out[1] = self.d * x + (z - self.b) * y;
        out[2] = self.c + self.a * z - z.powi(3) / 3.0 - (x * x + y * y) * (1.0 + self.e * z)
            + self.f * z * x.powi(3);
    }
}
