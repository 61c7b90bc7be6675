//! CMA-ES (spec §4.3.4): an evolution strategy over the continuous
//! (`uniform`/`log_uniform`) dimensions, mapped to the unit interval.
//! Integer/discrete/categorical parameters are sampled independently each
//! trial rather than modelled by the covariance matrix.
//!
//! State is not threaded incrementally between calls (spec §9 notes this as
//! an optimization, not a correctness requirement): each call replays
//! completed generations from the terminal history to reach the current
//! `(m, sigma, C)` before drawing the next candidate. This keeps the
//! sampler a pure function of `(space, history)` at the cost of redoing
//! O(n) work per call.

use hopt_space::{ParamSpec, StaticSpace};
use hopt_types::{rng_from_seed, Goal, HistorySnapshot, HoptResult, ParamMap, ParamValue, TerminalTrial};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

use crate::random::RandomSampler;
use crate::{Sampler, SamplerOpts};

struct CmaState {
    mean: DVector<f64>,
    sigma: f64,
    cov: DMatrix<f64>,
    path_sigma: DVector<f64>,
    path_c: DVector<f64>,
    eigen_b: DMatrix<f64>,
    eigen_d: DVector<f64>,
}

struct CmaParams {
    lambda: usize,
    mu: usize,
    weights: DVector<f64>,
    mu_eff: f64,
    c_sigma: f64,
    d_sigma: f64,
    cc: f64,
    c1: f64,
    cmu: f64,
    chi_n: f64,
}

impl CmaParams {
    fn for_dim(d: usize) -> Self {
        let lambda = (4 + (3.0 * (d as f64).ln()).floor() as usize).max(4);
        let mu = (lambda / 2).max(1);
        let raw_weights: Vec<f64> = (0..mu)
            .map(|i| ((mu as f64) + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw_weights.iter().sum();
        let weights = DVector::from_vec(raw_weights.iter().map(|w| w / total).collect());
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();
        let d = d as f64;
        let c_sigma = (mu_eff + 2.0) / (d + mu_eff + 5.0);
        let d_sigma = 1.0 + 2.0 * (((mu_eff - 1.0) / (d + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let cc = (4.0 + mu_eff / d) / (d + 4.0 + 2.0 * mu_eff / d);
        let c1 = 2.0 / ((d + 1.3).powi(2) + mu_eff);
        let cmu = (1.0 - c1).min(2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((d + 2.0).powi(2) + mu_eff));
        let chi_n = d.sqrt() * (1.0 - 1.0 / (4.0 * d) + 1.0 / (21.0 * d * d));
        Self {
            lambda,
            mu,
            weights,
            mu_eff,
            c_sigma,
            d_sigma,
            cc,
            c1,
            cmu,
            chi_n,
        }
    }
}

fn init_state(d: usize) -> CmaState {
    CmaState {
        mean: DVector::from_element(d, 0.5),
        sigma: 0.3,
        cov: DMatrix::identity(d, d),
        path_sigma: DVector::zeros(d),
        path_c: DVector::zeros(d),
        eigen_b: DMatrix::identity(d, d),
        eigen_d: DVector::from_element(d, 1.0),
    }
}

/// Applies one generation's update given the prior state and the
/// generation's `x` vectors (unit-space) sorted best-first.
fn update_generation(state: &mut CmaState, params: &CmaParams, sorted_x: &[DVector<f64>]) {
    let d = state.mean.len();
    let prev_mean = state.mean.clone();
    let prev_sigma = state.sigma;
    let c_inv_sqrt = &state.eigen_b
        * DMatrix::from_diagonal(&state.eigen_d.map(|v| 1.0 / v.max(1e-12)))
        * state.eigen_b.transpose();

    let mut new_mean = DVector::zeros(d);
    for (i, w) in params.weights.iter().enumerate().take(params.mu) {
        new_mean += sorted_x[i].clone() * *w;
    }

    let y_w = (&new_mean - &prev_mean) / prev_sigma;

    state.path_sigma = &state.path_sigma * (1.0 - params.c_sigma)
        + (&c_inv_sqrt * &y_w) * (params.c_sigma * (2.0 - params.c_sigma) * params.mu_eff).sqrt();

    state.path_c = &state.path_c * (1.0 - params.cc)
        + &y_w * (params.cc * (2.0 - params.cc) * params.mu_eff).sqrt();

    let mut rank_mu = DMatrix::zeros(d, d);
    for (i, w) in params.weights.iter().enumerate().take(params.mu) {
        let y_i = (&sorted_x[i] - &prev_mean) / prev_sigma;
        rank_mu += &y_i * y_i.transpose() * *w;
    }

    let rank_one = &state.path_c * state.path_c.transpose();
    state.cov = &state.cov * (1.0 - params.c1 - params.cmu) + rank_one * params.c1 + rank_mu * params.cmu;
    // Symmetrize and jitter before eigendecomposition (spec §9 "Numerical robustness").
    state.cov = (&state.cov + state.cov.transpose()) * 0.5;
    for i in 0..d {
        state.cov[(i, i)] += 1e-10;
    }

    state.mean = new_mean;
    state.sigma *= ((params.c_sigma / params.d_sigma) * (state.path_sigma.norm() / params.chi_n - 1.0)).exp();

    let eigen = SymmetricEigen::new(state.cov.clone());
    let has_nan = eigen.eigenvalues.iter().any(|v| !v.is_finite());
    if has_nan {
        warn!("cma-es eigendecomposition failed, shrinking sigma and skipping covariance update");
        state.sigma *= 0.5;
        return;
    }
    state.eigen_b = eigen.eigenvectors;
    state.eigen_d = eigen.eigenvalues.map(|v| v.max(1e-12).sqrt());
}

pub struct CmaEsSampler {
    rng: StdRng,
    goal: Goal,
    min_obs: usize,
    fallback: RandomSampler,
}

impl CmaEsSampler {
    pub fn new(opts: SamplerOpts) -> Self {
        let min_obs = opts.u64_opt("min_obs", 6) as usize;
        let seed = opts.seed;
        let goal = opts.goal;
        Self {
            rng: rng_from_seed(hopt_types::derive_tagged_seed(seed, "cma-es")),
            goal,
            min_obs,
            fallback: RandomSampler::new(SamplerOpts::new(seed, goal)),
        }
    }

    fn fitness(&self, t: &TerminalTrial) -> f64 {
        let s = t.score.unwrap_or(f64::INFINITY);
        match self.goal {
            Goal::Minimize => s,
            Goal::Maximize => -s,
        }
    }
}

impl Sampler for CmaEsSampler {
    fn next(
        &mut self,
        space: &StaticSpace,
        trial_index: u64,
        history: &HistorySnapshot,
    ) -> HoptResult<ParamMap> {
        let continuous: Vec<&hopt_space::ParamDef> = space
            .params
            .iter()
            .filter(|p| matches!(p.spec, ParamSpec::Uniform { .. } | ParamSpec::LogUniform { .. }))
            .collect();

        let scored: Vec<&TerminalTrial> = history.trials.iter().filter(|t| t.score.is_some()).collect();
        if scored.len() < self.min_obs || continuous.is_empty() {
            return self.fallback.next(space, trial_index, history);
        }

        let d = continuous.len();
        let params = CmaParams::for_dim(d);
        let mut state = init_state(d);

        let mut i = 0;
        while i + params.lambda <= scored.len() {
            let mut chunk: Vec<&TerminalTrial> = scored[i..i + params.lambda].to_vec();
            chunk.sort_by(|a, b| self.fitness(a).partial_cmp(&self.fitness(b)).unwrap());
            let sorted_x: Vec<DVector<f64>> = chunk
                .iter()
                .map(|t| {
                    DVector::from_vec(
                        continuous
                            .iter()
                            .map(|p| {
                                t.params
                                    .get(&p.name)
                                    .map(|v| p.spec.to_unit(v))
                                    .unwrap_or(0.5)
                            })
                            .collect(),
                    )
                })
                .collect();
            update_generation(&mut state, &params, &sorted_x);
            i += params.lambda;
        }

        let z: DVector<f64> = DVector::from_iterator(d, (0..d).map(|_| self.rng.sample::<f64, _>(StandardNormal)));
        let y = &state.eigen_b * DMatrix::from_diagonal(&state.eigen_d) * z;
        let x_unit = &state.mean + state.sigma * y;

        let mut result = ParamMap::new();
        for (k, p) in continuous.iter().enumerate() {
            let u = x_unit[k].clamp(0.0, 1.0);
            result.insert(p.name.clone(), p.spec.from_unit(u));
        }
        for p in &space.params {
            if !result.contains_key(&p.name) {
                result.insert(p.name.clone(), p.spec.sample(&mut self.rng));
            }
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "cmaes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_types::TrialStatus;
    use serde_json::json;

    fn space() -> StaticSpace {
        StaticSpace::new()
            .push("x", ParamSpec::Uniform { lo: -5.0, hi: 5.0 })
            .push("y", ParamSpec::Uniform { lo: -5.0, hi: 5.0 })
    }

    fn opts() -> SamplerOpts {
        let mut o = SamplerOpts::new(7, Goal::Minimize);
        o.extra = json!({ "min_obs": 4 });
        o
    }

    #[test]
    fn falls_back_to_random_below_min_obs() {
        let mut sampler = CmaEsSampler::new(opts());
        let history = HistorySnapshot::default();
        let params = sampler.next(&space(), 0, &history).unwrap();
        assert!(params["x"].as_f64().unwrap() >= -5.0);
    }

    #[test]
    fn proposes_within_bounds_after_generations() {
        let mut sampler = CmaEsSampler::new(opts());
        let mut history = HistorySnapshot::default();
        for i in 0..12u64 {
            let x = (i as f64 % 5.0) - 2.0;
            let y = (i as f64 % 3.0) - 1.0;
            history.trials.push(TerminalTrial {
                index: i,
                params: [
                    ("x".to_string(), ParamValue::Float(x)),
                    ("y".to_string(), ParamValue::Float(y)),
                ]
                .into_iter()
                .collect(),
                score: Some(x * x + y * y),
                status: TrialStatus::Succeeded,
                bracket: 0,
            });
        }
        for ix in 12..20 {
            let params = sampler.next(&space(), ix, &history).unwrap();
            let x = params["x"].as_f64().unwrap();
            let y = params["y"].as_f64().unwrap();
            assert!((-5.0..=5.0).contains(&x));
            assert!((-5.0..=5.0).contains(&y));
        }
    }
}
