use crate::traits::{Steppable, VectorField};

/// Classic Runge-Kutta 4th order solver (fixed step).
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;

        // k1 = f(t, y)
        field.eval(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + 0.5 * dt * self.k1[i];
        }
        field.eval(t0 + 0.5 * dt, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + 0.5 * dt * self.k2[i];
        }
        field.eval(t0 + 0.5 * dt, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        field.eval(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] +=
                dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsitouras 5(4) coefficients.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;
const C6: f64 = 1.0;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.898;
const A42: f64 = -6.359447987781783;
const A43: f64 = 4.361447987781783;
const A51: f64 = 5.325864858437957;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.495539342889693;
const A54: f64 = -0.09249506636030195;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.02826857949054663;

// b coefficients (5th order update); the final stage row doubles as b.
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436099;
const B6: f64 = 2.324710524099774;

// Difference between the 5th-order weights and the embedded 4th-order
// weights. Dotted with the stages (including k7 = f(t+dt, y_next)), this
// gives the local error estimate.
const E1: f64 = -1.780011052225771e-3;
const E2: f64 = -8.164344596567469e-4;
const E3: f64 = 7.880878010261995e-3;
const E4: f64 = -1.447110071732629e-1;
const E5: f64 = 5.823571654525552e-1;
const E6: f64 = -4.580821059291869e-1;
const E7: f64 = 1.0 / 66.0;

/// Tsitouras 5/4 solver. `step` applies the 5th-order update at a fixed
/// step; `trial_step` additionally evaluates the embedded 4th-order error
/// estimate so an adaptive driver can accept or reject the step.
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    y_next: Vec<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            y_next: vec![0.0; dim],
        }
    }

    /// Computes stages k1..k6 and the 5th-order solution into `self.y_next`
    /// without touching the caller's state.
    fn stages(&mut self, field: &impl VectorField, t0: f64, state: &[f64], dt: f64) {
        // k1
        field.eval(t0, state, &mut self.k1);

        // k2
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (A21 * self.k1[i]);
        }
        field.eval(t0 + C2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        field.eval(t0 + C3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..state.len() {
            self.tmp[i] =
                state[i] + dt * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        field.eval(t0 + C4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        field.eval(t0 + C5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        field.eval(t0 + C6 * dt, &self.tmp, &mut self.k6);

        // 5th-order solution
        for i in 0..state.len() {
            self.y_next[i] = state[i]
                + dt * (B1 * self.k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
    }

    /// Attempts one step of size `dt` from `state`, writing the candidate
    /// solution into `out` and returning the scaled max-norm error estimate.
    /// The step is acceptable when the returned value is <= 1. The caller's
    /// state is left untouched, so a rejected step can simply be retried
    /// with a smaller `dt`.
    pub fn trial_step(
        &mut self,
        field: &impl VectorField,
        t0: f64,
        state: &[f64],
        dt: f64,
        out: &mut [f64],
        rtol: f64,
        atol: f64,
    ) -> f64 {
        self.stages(field, t0, state, dt);
        out.copy_from_slice(&self.y_next);

        // k7 completes the embedded pair.
        field.eval(t0 + dt, out, &mut self.k7);

        let mut err: f64 = 0.0;
        for i in 0..state.len() {
            let estimate = dt
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
            let scale = atol + rtol * state[i].abs().max(out[i].abs());
            err = err.max((estimate / scale).abs());
        }
        err
    }
}

impl Steppable for Tsit5 {
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64) {
        self.stages(field, *t, state, dt);
        state.copy_from_slice(&self.y_next);
        *t += dt;
    }
}
