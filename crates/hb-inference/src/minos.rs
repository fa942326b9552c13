//! Profile-likelihood intervals (MINOS).
//!
//! For each free parameter, find where the profiled NLL rises by `up` above
//! the minimum on either side. Every profile point is a conditional fit of
//! the remaining free parameters, warm-started from the previous one.

use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction};
use hb_core::{Objective, Result};

/// Free-parameter view of an objective: fixed coordinates come from `base`.
pub struct Projection<'a, O: Objective + ?Sized> {
    objective: &'a O,
    base: Vec<f64>,
    free: Vec<usize>,
}

impl<'a, O: Objective + ?Sized> Projection<'a, O> {
    /// View over `free` with every other coordinate pinned to `base`.
    pub fn new(objective: &'a O, base: Vec<f64>, free: Vec<usize>) -> Self {
        Self { objective, base, free }
    }

    /// Full parameter vector from free coordinates.
    pub fn expand(&self, x: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (&i, &v) in self.free.iter().zip(x) {
            full[i] = v;
        }
        full
    }

    /// Free coordinates of `full`.
    pub fn restrict(&self, full: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }
}

impl<O: Objective + ?Sized> ObjectiveFunction for Projection<'_, O> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.objective.eval(&self.expand(params))
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let full = self.objective.gradient(&self.expand(params))?;
        Ok(self.free.iter().map(|&i| full[i]).collect())
    }
}

/// Root-finding settings.
#[derive(Debug, Clone)]
pub struct MinosConfig {
    /// NLL rise defining the interval (0.5 for 1σ).
    pub up: f64,
    /// Accepted `|profile - fmin - up|`.
    pub tol: f64,
    /// Step doublings while bracketing.
    pub max_bracket: usize,
    /// Bisection steps after bracketing.
    pub max_iter: usize,
}

impl Default for MinosConfig {
    fn default() -> Self {
        Self { up: 0.5, tol: 1e-3, max_bracket: 12, max_iter: 40 }
    }
}

/// Interval around the minimum as signed offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinosInterval {
    /// Lower offset (≤ 0).
    pub lower: f64,
    /// Upper offset (≥ 0).
    pub upper: f64,
    /// Lower crossing found before the parameter limit.
    pub lower_valid: bool,
    /// Upper crossing found before the parameter limit.
    pub upper_valid: bool,
}

impl MinosInterval {
    /// Both crossings found.
    pub fn is_valid(&self) -> bool {
        self.lower_valid && self.upper_valid
    }
}

struct Profiler<'a, O: Objective + ?Sized> {
    objective: &'a O,
    bounds: &'a [(f64, f64)],
    others: Vec<usize>,
    target: usize,
    warm: Vec<f64>,
    optimizer: &'a LbfgsbOptimizer,
    evaluations: usize,
}

impl<O: Objective + ?Sized> Profiler<'_, O> {
    /// Profiled NLL with the target pinned at `value`.
    fn at(&mut self, value: f64) -> Result<f64> {
        self.warm[self.target] = value;
        let proj = Projection::new(self.objective, self.warm.clone(), self.others.clone());
        let x0 = proj.restrict(&self.warm);
        let bounds: Vec<_> = self.others.iter().map(|&i| self.bounds[i]).collect();
        let result = self.optimizer.minimize(&proj, &x0, &bounds)?;
        self.evaluations += result.n_fev + result.n_gev;
        self.warm = proj.expand(&result.parameters);
        Ok(result.fval)
    }
}

/// Search one side (`direction` = ±1). Returns `(offset, valid)`.
fn crossing<O: Objective + ?Sized>(
    profiler: &mut Profiler<'_, O>,
    best: &[f64],
    fmin: f64,
    sigma: f64,
    direction: f64,
    config: &MinosConfig,
) -> Result<(f64, bool)> {
    let target = profiler.target;
    let x0 = best[target];
    let (lo, hi) = profiler.bounds[target];
    let limit = if direction > 0.0 { hi } else { lo };
    profiler.warm = best.to_vec();

    let mut inner = (x0, -config.up);
    let mut step = if sigma.is_finite() && sigma > 0.0 { sigma } else { 1.0 };
    let mut outer = None;

    for _ in 0..config.max_bracket {
        let mut v = x0 + direction * step;
        let at_limit = if direction > 0.0 { v >= limit } else { v <= limit };
        if at_limit {
            v = limit;
        }
        let g = profiler.at(v)? - fmin - config.up;
        if g >= 0.0 {
            outer = Some((v, g));
            break;
        }
        if at_limit {
            return Ok((v - x0, false));
        }
        inner = (v, g);
        step *= 2.0;
    }

    let Some(mut outer) = outer else {
        return Ok((inner.0 - x0, false));
    };

    for _ in 0..config.max_iter {
        if outer.1.abs() < config.tol {
            return Ok((outer.0 - x0, true));
        }
        let mid = 0.5 * (inner.0 + outer.0);
        let g = profiler.at(mid)? - fmin - config.up;
        if g.abs() < config.tol {
            return Ok((mid - x0, true));
        }
        if g < 0.0 {
            inner = (mid, g);
        } else {
            outer = (mid, g);
        }
    }

    // Linear interpolation inside the final bracket.
    let t = -inner.1 / (outer.1 - inner.1);
    Ok((inner.0 + t * (outer.0 - inner.0) - x0, true))
}

/// MINOS interval of parameter `target` around the minimum `best` (value `fmin`).
///
/// `free` lists every free parameter (including `target`); `sigma` seeds the
/// bracketing step. Returns the interval and the objective evaluations spent.
#[allow(clippy::too_many_arguments)]
pub fn minos_interval<O: Objective + ?Sized>(
    objective: &O,
    best: &[f64],
    bounds: &[(f64, f64)],
    free: &[usize],
    target: usize,
    fmin: f64,
    sigma: f64,
    optimizer: &LbfgsbOptimizer,
    config: &MinosConfig,
) -> Result<(MinosInterval, usize)> {
    let mut profiler = Profiler {
        objective,
        bounds,
        others: free.iter().copied().filter(|&i| i != target).collect(),
        target,
        warm: best.to_vec(),
        optimizer,
        evaluations: 0,
    };

    let (upper, upper_valid) = crossing(&mut profiler, best, fmin, sigma, 1.0, config)?;
    let (lower, lower_valid) = crossing(&mut profiler, best, fmin, sigma, -1.0, config)?;

    Ok((MinosInterval { lower, upper, lower_valid, upper_valid }, profiler.evaluations))
}
