//! Binned negative log-likelihood compiled from a workspace density graph.
//!
//! Each channel contributes Poisson terms `nu - n ln(nu) + lnΓ(n+1)`; each
//! constrained parameter contributes one Gaussian term, however many
//! channels reference it. Channels whose weighted sum carries the
//! `BinnedLikelihood` attribute are evaluated bin by bin with an analytic
//! gradient; the others go through the normalised-density form (extended
//! term plus shape term) and a numerical gradient.

use crate::interp::Code4;
use hb_core::{Error, Objective, Result};
use hb_model::factory::{alpha_name, density_sum_name, gamma_name, stat_relative_errors};
use hb_model::{BINNED_LIKELIHOOD, ComponentKind, DensityComponent, LUMI, Workspace};
use rayon::prelude::*;
use statrs::function::gamma::ln_gamma;
use std::collections::{HashMap, HashSet};

const NU_FLOOR: f64 = 1e-10;
const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;

/// Parameter metadata in objective order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Initial value.
    pub init: f64,
    /// `(min, max)`.
    pub bounds: (f64, f64),
    /// Held constant.
    pub fixed: bool,
}

#[derive(Debug, Default)]
struct ParameterRegistry {
    params: Vec<ParameterInfo>,
    index: HashMap<String, usize>,
}

impl ParameterRegistry {
    /// Index of `name`, registering it on first sight.
    fn register(&mut self, name: &str, init: f64, bounds: (f64, f64), fixed: bool) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.params.len();
        self.params.push(ParameterInfo { name: name.to_string(), init, bounds, fixed });
        self.index.insert(name.to_string(), i);
        i
    }
}

#[derive(Debug, Clone)]
enum FactorKind {
    Linear,
    NormSys(Code4),
}

#[derive(Debug, Clone)]
struct Factor {
    param: usize,
    kind: FactorKind,
}

impl Factor {
    fn value_and_derivative(&self, params: &[f64]) -> (f64, f64) {
        let x = params[self.param];
        match &self.kind {
            FactorKind::Linear => (x, 1.0),
            FactorKind::NormSys(code4) => code4.value_and_derivative(x),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledSample {
    nominal: Vec<f64>,
    factors: Vec<Factor>,
    stat: bool,
}

impl CompiledSample {
    fn scale(&self, params: &[f64]) -> f64 {
        self.factors.iter().map(|f| f.value_and_derivative(params).0).product()
    }
}

#[derive(Debug, Clone)]
struct CompiledChannel {
    name: String,
    observed: Vec<f64>,
    ln_factorials: Vec<f64>,
    samples: Vec<CompiledSample>,
    gammas: Option<Vec<usize>>,
    binned: bool,
    params: Vec<usize>,
}

impl CompiledChannel {
    fn n_bins(&self) -> usize {
        self.observed.len()
    }

    fn expected_raw(&self, params: &[f64], scales: &[f64], bin: usize) -> f64 {
        let mut nu = 0.0;
        for (s, &k) in self.samples.iter().zip(scales) {
            let mut c = s.nominal[bin] * k;
            if s.stat {
                if let Some(g) = &self.gammas {
                    c *= params[g[bin]];
                }
            }
            nu += c;
        }
        nu
    }

    fn nll(&self, params: &[f64]) -> f64 {
        let scales: Vec<f64> = self.samples.iter().map(|s| s.scale(params)).collect();
        let nu_of = |b: usize| self.expected_raw(params, &scales, b).max(NU_FLOOR);

        if self.binned {
            return (0..self.n_bins())
                .into_par_iter()
                .map(|b| {
                    let nu = nu_of(b);
                    nu - self.observed[b] * nu.ln() + self.ln_factorials[b]
                })
                .sum();
        }

        let nu: Vec<f64> = (0..self.n_bins()).into_par_iter().map(nu_of).collect();
        let total: f64 = nu.iter().sum();
        let n_total: f64 = self.observed.iter().sum();
        let shape: f64 = (0..self.n_bins())
            .into_par_iter()
            .map(|b| {
                let n = self.observed[b];
                if n > 0.0 { -n * (nu[b] / total).ln() } else { 0.0 }
            })
            .sum();
        let ln_fact: f64 = self.ln_factorials.iter().sum();
        total - n_total * total.ln() + shape + ln_fact
    }

    fn accumulate_gradient(&self, params: &[f64], grad: &mut [f64]) {
        let factor_values: Vec<Vec<(f64, f64)>> = self
            .samples
            .iter()
            .map(|s| s.factors.iter().map(|f| f.value_and_derivative(params)).collect())
            .collect();
        let scales: Vec<f64> =
            factor_values.iter().map(|fv| fv.iter().map(|(v, _)| v).product()).collect();

        // d(nll)/d(nu_b); zero where the floor is active
        let weights: Vec<f64> = (0..self.n_bins())
            .into_par_iter()
            .map(|b| {
                let nu = self.expected_raw(params, &scales, b);
                if nu > NU_FLOOR { 1.0 - self.observed[b] / nu } else { 0.0 }
            })
            .collect();

        for (si, s) in self.samples.iter().enumerate() {
            let gamma_at = |b: usize| match (&self.gammas, s.stat) {
                (Some(g), true) => params[g[b]],
                _ => 1.0,
            };

            let d_scale: f64 = (0..self.n_bins()).map(|b| weights[b] * s.nominal[b] * gamma_at(b)).sum();
            let fv = &factor_values[si];
            for (j, factor) in s.factors.iter().enumerate() {
                let others: f64 =
                    fv.iter().enumerate().filter(|(i, _)| *i != j).map(|(_, (v, _))| v).product();
                grad[factor.param] += d_scale * others * fv[j].1;
            }

            if s.stat {
                if let Some(g) = &self.gammas {
                    for b in 0..self.n_bins() {
                        grad[g[b]] += weights[b] * s.nominal[b] * scales[si];
                    }
                }
            }
        }
    }

    fn numeric_gradient(&self, params: &[f64], grad: &mut [f64]) {
        let mut work = params.to_vec();
        for &i in &self.params {
            let x = params[i];
            let eps = 1e-7 * x.abs().max(1.0);
            work[i] = x + eps;
            let f_plus = self.nll(&work);
            work[i] = x - eps;
            let f_minus = self.nll(&work);
            work[i] = x;
            grad[i] += (f_plus - f_minus) / (2.0 * eps);
        }
    }
}

#[derive(Debug, Clone)]
struct Constraint {
    param: usize,
    mean: f64,
    sigma: f64,
    ln_norm: f64,
}

/// Negative log-likelihood of one density against one dataset.
pub struct BinnedNll {
    params: Vec<ParameterInfo>,
    poi: Option<usize>,
    channels: Vec<CompiledChannel>,
    constraints: Vec<Constraint>,
    pool: rayon::ThreadPool,
    worker_count: usize,
}

impl std::fmt::Debug for BinnedNll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinnedNll")
            .field("n_params", &self.params.len())
            .field("n_channels", &self.channels.len())
            .field("n_constraints", &self.constraints.len())
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

fn missing(what: &str, name: &str) -> Error {
    Error::Engine(format!("{} '{}' not found in workspace", what, name))
}

impl BinnedNll {
    /// Compile density `pdf_name` against dataset `data_name`, evaluated on
    /// `worker_count` threads.
    pub fn compile(
        workspace: &Workspace,
        pdf_name: &str,
        data_name: &str,
        worker_count: usize,
    ) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        let pdf = workspace.pdf(pdf_name).ok_or_else(|| missing("pdf", pdf_name))?;
        let data = workspace.data(data_name).ok_or_else(|| missing("dataset", data_name))?;

        let channel_models: Vec<&DensityComponent> = match pdf.kind {
            ComponentKind::Simultaneous => pdf
                .servers
                .iter()
                .map(|s| workspace.pdf(s).ok_or_else(|| missing("channel pdf", s)))
                .collect::<Result<_>>()?,
            _ => vec![pdf],
        };

        let measurement = workspace.measurement();
        let constants = &workspace.model_config().constant_parameters;
        let is_fixed =
            |name: &str| constants.contains(name) || measurement.constant_params.contains(name);

        let mut registry = ParameterRegistry::default();
        if let Some(poi) = workspace.model_config().poi() {
            let nf = workspace
                .channels()
                .iter()
                .flat_map(|c| &c.samples)
                .filter_map(|s| s.norm_factor.as_ref())
                .find(|nf| nf.name == poi);
            if let Some(nf) = nf {
                registry.register(&nf.name, nf.initial, (nf.low, nf.high), is_fixed(&nf.name));
            }
        }

        let mut channels = Vec::with_capacity(channel_models.len());
        let mut constraints = Vec::new();
        let mut constrained = HashSet::new();

        for model in channel_models {
            let ch_name = model
                .channel
                .as_deref()
                .ok_or_else(|| Error::Engine(format!("pdf '{}' names no channel", model.name)))?;
            let channel = workspace.channel(ch_name).ok_or_else(|| missing("channel", ch_name))?;
            let sum_name = density_sum_name(ch_name);
            let sum = workspace.component(&sum_name).ok_or_else(|| missing("component", &sum_name))?;

            let observed = data
                .counts(ch_name)
                .ok_or_else(|| Error::Engine(format!("dataset '{}' has no channel '{}'", data_name, ch_name)))?
                .to_vec();
            if observed.len() != channel.n_bins() {
                return Err(Error::Engine(format!(
                    "dataset bins for '{}' ({}) != channel bins ({})",
                    ch_name,
                    observed.len(),
                    channel.n_bins()
                )));
            }
            if observed.iter().any(|n| !(n.is_finite() && *n >= 0.0)) {
                return Err(Error::Engine(format!("invalid observed counts in '{}'", ch_name)));
            }

            let mut samples = Vec::with_capacity(channel.samples.len());
            for s in &channel.samples {
                let mut factors = Vec::new();
                if let Some(nf) = &s.norm_factor {
                    let param = registry.register(&nf.name, nf.initial, (nf.low, nf.high), is_fixed(&nf.name));
                    factors.push(Factor { param, kind: FactorKind::Linear });
                }
                if s.normalize_by_theory {
                    let lumi = measurement.luminosity;
                    let rel = measurement.luminosity_rel_err;
                    let bounds = ((lumi * (1.0 - 5.0 * rel)).max(0.0), lumi * (1.0 + 5.0 * rel));
                    let param = registry.register(LUMI, lumi, bounds, is_fixed(LUMI));
                    factors.push(Factor { param, kind: FactorKind::Linear });
                }
                for sys in &s.systematics {
                    let name = alpha_name(&sys.name);
                    let param = registry.register(&name, 0.0, (-5.0, 5.0), is_fixed(&name));
                    let code4 = Code4::new(1.0 + sys.uncertainty_up, 1.0 - sys.uncertainty_down);
                    factors.push(Factor { param, kind: FactorKind::NormSys(code4) });
                }
                samples.push(CompiledSample {
                    nominal: s.histogram.counts().to_vec(),
                    factors,
                    stat: s.has_stat_error,
                });
            }

            let gammas = stat_relative_errors(channel).map(|rel| {
                rel.iter()
                    .enumerate()
                    .map(|(b, &sigma)| {
                        let name = gamma_name(ch_name, b);
                        let bounds = ((1.0 - 5.0 * sigma).max(0.0), 1.0 + 5.0 * sigma);
                        registry.register(&name, 1.0, bounds, is_fixed(&name))
                    })
                    .collect::<Vec<_>>()
            });

            for server in &model.servers {
                let comp = workspace.component(server).ok_or_else(|| missing("component", server))?;
                let ComponentKind::GaussianConstraint { parameter, mean, sigma } = &comp.kind else {
                    continue;
                };
                if !constrained.insert(parameter.clone()) {
                    continue;
                }
                let Some(&param) = registry.index.get(parameter) else {
                    return Err(Error::Engine(format!(
                        "constraint '{}' on unknown parameter '{}'",
                        comp.name, parameter
                    )));
                };
                if *sigma <= 0.0 {
                    log::debug!("skipping zero-width constraint on {}", parameter);
                    continue;
                }
                constraints.push(Constraint {
                    param,
                    mean: *mean,
                    sigma: *sigma,
                    ln_norm: sigma.ln() + HALF_LN_2PI,
                });
            }

            let mut params: Vec<usize> = samples
                .iter()
                .flat_map(|s| s.factors.iter().map(|f| f.param))
                .chain(gammas.iter().flatten().copied())
                .collect();
            params.sort_unstable();
            params.dedup();

            channels.push(CompiledChannel {
                name: ch_name.to_string(),
                ln_factorials: observed.iter().map(|&n| ln_gamma(n + 1.0)).collect(),
                observed,
                samples,
                gammas,
                binned: sum.has_attribute(BINNED_LIKELIHOOD),
                params,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("hb-nll-{}", i))
            .build()
            .map_err(|e| Error::Engine(format!("cannot start {} workers: {}", worker_count, e)))?;

        let poi = workspace.model_config().poi().and_then(|p| registry.index.get(p).copied());
        log::debug!(
            "compiled '{}': {} channel(s), {} parameter(s), {} constraint(s), {} worker(s)",
            pdf_name,
            channels.len(),
            registry.params.len(),
            constraints.len(),
            worker_count
        );

        Ok(Self { params: registry.params, poi, channels, constraints, pool, worker_count })
    }

    /// Size of the evaluation pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Parameter metadata in objective order.
    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.params
    }

    /// Index of a parameter by name.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Channel names in evaluation order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether `channel` is evaluated on the per-bin path.
    pub fn is_binned(&self, channel: &str) -> Option<bool> {
        self.channels.iter().find(|c| c.name == channel).map(|c| c.binned)
    }

    fn check_len(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.params.len(),
                params.len()
            )));
        }
        Ok(())
    }

    fn constraint_nll(&self, params: &[f64]) -> f64 {
        self.constraints
            .iter()
            .map(|c| {
                let pull = (params[c.param] - c.mean) / c.sigma;
                0.5 * pull * pull + c.ln_norm
            })
            .sum()
    }
}

impl Objective for BinnedNll {
    fn dim(&self) -> usize {
        self.params.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| p.bounds).collect()
    }

    fn fixed_parameters(&self) -> Vec<bool> {
        self.params.iter().map(|p| p.fixed).collect()
    }

    fn poi_index(&self) -> Option<usize> {
        self.poi
    }

    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.check_len(params)?;
        let value = self.pool.install(|| {
            let main: f64 = self.channels.par_iter().map(|c| c.nll(params)).sum();
            main + self.constraint_nll(params)
        });
        if !value.is_finite() {
            return Err(Error::Engine(format!("non-finite NLL ({})", value)));
        }
        Ok(value)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_len(params)?;
        let grad = self.pool.install(|| {
            let mut grad = vec![0.0; params.len()];
            for ch in &self.channels {
                if ch.binned {
                    ch.accumulate_gradient(params, &mut grad);
                } else {
                    ch.numeric_gradient(params, &mut grad);
                }
            }
            for c in &self.constraints {
                grad[c.param] += (params[c.param] - c.mean) / (c.sigma * c.sigma);
            }
            grad
        });
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(Error::Engine("non-finite NLL gradient".to_string()));
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hb_model::{BuildSpec, ModelCombiner, Measurement, OBS_DATA};

    fn compile(spec: BuildSpec, workers: usize) -> BinnedNll {
        let ws = spec.build_workspace().unwrap();
        BinnedNll::compile(&ws, ws.model_config().pdf_name(), OBS_DATA, workers).unwrap()
    }

    #[test]
    fn test_poi_first_and_bounds() {
        let nll = compile(BuildSpec::new(2, 4, 1), 1);
        let p = nll.parameters();
        assert_eq!(p[0].name, "SignalStrength");
        assert_eq!(p[0].bounds, (0.0, 3.0));
        assert_eq!(nll.poi_index(), Some(0));
        let alpha = &p[nll.parameter_index("alpha_norm_uncertainty_0").unwrap()];
        assert_eq!(alpha.bounds, (-5.0, 5.0));
        let gamma = &p[nll.parameter_index("gamma_stat_Region1_bin_3").unwrap()];
        assert!(gamma.bounds.0 > 0.0 && gamma.bounds.1 > 1.0);
        assert_eq!(nll.channel_names(), ["Region0", "Region1"]);
    }

    #[test]
    fn test_reference_value_at_nominal() {
        // Single mu, no constraints: nll = sum(nu - n ln nu + lnΓ(n+1)) with nu == n.
        let nll = compile(BuildSpec::reference(), 1);
        assert_eq!(nll.dim(), 1);
        let expected: f64 = (1..=10)
            .map(|b| {
                let n = (b + 1 + 101) as f64;
                n - n * n.ln() + ln_gamma(n + 1.0)
            })
            .sum();
        assert_relative_eq!(nll.eval(&[1.0]).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_analytic_gradient_matches_numeric() {
        let nll = compile(BuildSpec::new(2, 5, 2), 2);
        let mut x = nll.parameter_init();
        for (i, v) in x.iter_mut().enumerate() {
            *v += 0.01 * ((i % 5) as f64 - 2.0);
        }
        let analytic = nll.gradient(&x).unwrap();
        for i in 0..x.len() {
            let eps = 1e-6;
            let mut xp = x.clone();
            xp[i] += eps;
            let mut xm = x.clone();
            xm[i] -= eps;
            let fd = (nll.eval(&xp).unwrap() - nll.eval(&xm).unwrap()) / (2.0 * eps);
            assert_relative_eq!(analytic[i], fd, epsilon = 1e-3, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_untagged_path_agrees() {
        let spec = BuildSpec::new(1, 6, 2);
        let tagged_ws = spec.build_workspace().unwrap();
        let combiner = ModelCombiner::new(Measurement::benchmark()).without_binned_tagging();
        let untagged_ws = spec.build_workspace_with(&combiner).unwrap();
        let pdf = tagged_ws.model_config().pdf_name();

        let tagged = BinnedNll::compile(&tagged_ws, pdf, OBS_DATA, 1).unwrap();
        let untagged = BinnedNll::compile(&untagged_ws, pdf, OBS_DATA, 1).unwrap();
        assert_eq!(tagged.is_binned("Region0"), Some(true));
        assert_eq!(untagged.is_binned("Region0"), Some(false));

        let mut x = tagged.parameter_init();
        x[0] = 1.3;
        assert_relative_eq!(
            tagged.eval(&x).unwrap(),
            untagged.eval(&x).unwrap(),
            max_relative = 1e-10
        );
        let ga = tagged.gradient(&x).unwrap();
        let gn = untagged.gradient(&x).unwrap();
        for (a, n) in ga.iter().zip(&gn) {
            assert_relative_eq!(a, n, epsilon = 1e-3, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_unknown_names_are_engine_errors() {
        let ws = BuildSpec::reference().build_workspace().unwrap();
        assert!(matches!(BinnedNll::compile(&ws, "nope", OBS_DATA, 1), Err(Error::Engine(_))));
        assert!(matches!(
            BinnedNll::compile(&ws, "model_Region0", "asimov", 1),
            Err(Error::Engine(_))
        ));
        assert!(matches!(
            BinnedNll::compile(&ws, "model_Region0", OBS_DATA, 0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let nll = compile(BuildSpec::reference(), 1);
        assert!(nll.eval(&[1.0, 2.0]).is_err());
    }
}
