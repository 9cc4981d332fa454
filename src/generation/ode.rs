//! Fixed-step ODE solvers and the sampling time grid.

use anyhow::Result;
use candle_core::Tensor;
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::str::FromStr;

/// Fixed-step explicit solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OdeMethod {
    /// First order: `y += dt * f(t, y)`.
    #[default]
    Euler,
    /// Second-order Runge-Kutta evaluated at the half step.
    Midpoint,
}

impl OdeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OdeMethod::Euler => "euler",
            OdeMethod::Midpoint => "midpoint",
        }
    }

    /// Velocity evaluations per step.
    pub fn evals_per_step(&self) -> usize {
        match self {
            OdeMethod::Euler => 1,
            OdeMethod::Midpoint => 2,
        }
    }
}

impl FromStr for OdeMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euler" => Ok(OdeMethod::Euler),
            "midpoint" => Ok(OdeMethod::Midpoint),
            other => anyhow::bail!("Unknown method: '{other}'. Supported: euler, midpoint"),
        }
    }
}

impl fmt::Display for OdeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every state visited by a solver, starting with the initial state.
#[derive(Debug, Clone)]
pub struct Trajectory {
    states: Vec<Tensor>,
}

impl Trajectory {
    pub fn new(states: Vec<Tensor>) -> Self {
        Self { states }
    }

    pub fn states(&self) -> &[Tensor] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Final state, i.e. the sample.
    pub fn last(&self) -> Option<&Tensor> {
        self.states.last()
    }

    /// All states stacked along a new leading axis.
    pub fn stack(&self) -> Result<Tensor> {
        Ok(Tensor::stack(&self.states, 0)?)
    }
}

/// `steps` points linearly spaced over `[0, 1]`, optionally sway-warped.
///
/// Sway: `t' = t + coef * (cos(pi/2 * t) - 1 + t)`. Negative coefficients
/// concentrate points near 0, positive ones near 1. Both endpoints are kept.
/// Intermediate points stay ordered for `coef` in `[-1, 1]`; larger magnitudes
/// can fold the grid (see [`is_monotone`]).
pub fn time_grid(steps: usize, sway_coef: Option<f64>) -> Vec<f64> {
    let mut t: Vec<f64> = match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        n => (0..n).map(|i| i as f64 / (n - 1) as f64).collect(),
    };
    if let Some(coef) = sway_coef {
        for v in &mut t {
            *v += coef * ((FRAC_PI_2 * *v).cos() - 1.0 + *v);
        }
    }
    t
}

/// Whether a grid is non-decreasing.
pub fn is_monotone(t: &[f64]) -> bool {
    t.windows(2).all(|w| w[1] >= w[0])
}

/// Euler integration over the grid `t`.
pub fn odeint_euler<F>(mut f: F, y0: &Tensor, t: &[f64]) -> Result<Trajectory>
where
    F: FnMut(f64, &Tensor) -> Result<Tensor>,
{
    let mut ys = Vec::with_capacity(t.len().max(1));
    ys.push(y0.clone());
    let mut y = y0.clone();

    for w in t.windows(2) {
        let (t_i, dt) = (w[0], w[1] - w[0]);
        let k = f(t_i, &y)?;
        y = (&y + (k * dt)?)?;
        ys.push(y.clone());
    }
    Ok(Trajectory::new(ys))
}

/// Midpoint (RK2) integration over the grid `t`.
pub fn odeint_midpoint<F>(mut f: F, y0: &Tensor, t: &[f64]) -> Result<Trajectory>
where
    F: FnMut(f64, &Tensor) -> Result<Tensor>,
{
    let mut ys = Vec::with_capacity(t.len().max(1));
    ys.push(y0.clone());
    let mut y = y0.clone();

    for w in t.windows(2) {
        let (t_i, dt) = (w[0], w[1] - w[0]);
        let k1 = f(t_i, &y)?;
        let mid = (&y + (k1 * (0.5 * dt))?)?;
        let k2 = f(t_i + 0.5 * dt, &mid)?;
        y = (&y + (k2 * dt)?)?;
        ys.push(y.clone());
    }
    Ok(Trajectory::new(ys))
}

/// Integrate with the chosen solver.
pub fn odeint<F>(method: OdeMethod, f: F, y0: &Tensor, t: &[f64]) -> Result<Trajectory>
where
    F: FnMut(f64, &Tensor) -> Result<Tensor>,
{
    match method {
        OdeMethod::Euler => odeint_euler(f, y0, t),
        OdeMethod::Midpoint => odeint_midpoint(f, y0, t),
    }
}
