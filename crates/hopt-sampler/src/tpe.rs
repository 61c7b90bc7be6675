//! Tree-structured Parzen Estimator (spec §4.3.3): the default sampler for
//! mixed search spaces. Splits terminal history into *good*/*bad* partitions
//! and scores proposals by the log-ratio of per-parameter good/bad
//! densities, a proxy for Expected Improvement.

use std::f64::consts::PI;

use hopt_space::{ParamSpec, StaticSpace};
use hopt_types::{rng_from_seed, Goal, HistorySnapshot, HoptResult, ParamMap, ParamValue};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value as Json;
use tracing::debug;

use crate::random::RandomSampler;
use crate::{Sampler, SamplerOpts};

const DEGENERACY_PRIOR_WEIGHT: f64 = 0.01;
const LOG_FLOOR: f64 = 1e-12;

/// 1-D Gaussian KDE over a transformed (linear or log) continuous/integer
/// axis, smoothed with a small uniform-prior mixture (spec §4.3.3 "Smooth by
/// mixing 1% weight of the uniform prior ... to eliminate degeneracies").
struct Kde1D {
    points: Vec<f64>,
    bandwidth: f64,
    lo: f64,
    hi: f64,
}

impl Kde1D {
    fn fit(points: Vec<f64>, lo: f64, hi: f64) -> Option<Self> {
        let n = points.len();
        if n == 0 {
            return None;
        }
        let range = (hi - lo).max(f64::MIN_POSITIVE);
        let bw_floor = 1e-3 * range;
        let sigma = if n > 1 {
            let mean = points.iter().sum::<f64>() / n as f64;
            let var = points.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            range * 0.1
        };
        let bw_factor = 1.06 * 0.5;
        let bandwidth = (bw_factor * sigma * (n as f64).powf(-1.0 / 5.0)).max(bw_floor);
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return None;
        }
        Some(Self {
            points,
            bandwidth,
            lo,
            hi,
        })
    }

    fn density(&self, x: f64) -> f64 {
        let uniform = 1.0 / (self.hi - self.lo).max(f64::MIN_POSITIVE);
        let n = self.points.len() as f64;
        let gaussian_mix = self
            .points
            .iter()
            .map(|&p| gaussian_pdf(x, p, self.bandwidth))
            .sum::<f64>()
            / n;
        (1.0 - DEGENERACY_PRIOR_WEIGHT) * gaussian_mix + DEGENERACY_PRIOR_WEIGHT * uniform
    }

    fn log_density(&self, x: f64) -> f64 {
        self.density(x).max(LOG_FLOOR).ln()
    }

    fn sample(&self, rng: &mut impl Rng) -> f64 {
        if rng.gen::<f64>() < DEGENERACY_PRIOR_WEIGHT {
            return rng.gen_range(self.lo..=self.hi);
        }
        let idx = rng.gen_range(0..self.points.len());
        let draw = self.points[idx] + rng.sample::<f64, _>(rand_distr::StandardNormal) * self.bandwidth;
        draw.clamp(self.lo, self.hi)
    }
}

fn gaussian_pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let sigma = sigma.max(f64::MIN_POSITIVE);
    let z = (x - mean) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
}

/// Multinomial with Laplace-1 smoothing over observed categories (spec
/// §4.3.3 "Categorical: multinomial with Laplace-1 smoothing").
struct Categorical {
    values: Vec<Json>,
    probs: Vec<f64>,
}

impl Categorical {
    fn fit(observed: &[Json], universe: &[Json]) -> Self {
        let k = universe.len().max(1);
        let mut counts: Vec<f64> = vec![1.0; k]; // Laplace-1
        for v in observed {
            if let Some(idx) = universe.iter().position(|u| u == v) {
                counts[idx] += 1.0;
            }
        }
        let total: f64 = counts.iter().sum();
        let probs = counts.into_iter().map(|c| c / total).collect();
        Self {
            values: universe.to_vec(),
            probs,
        }
    }

    fn log_density(&self, v: &Json) -> f64 {
        match self.values.iter().position(|u| u == v) {
            Some(idx) => self.probs[idx].max(LOG_FLOOR).ln(),
            None => LOG_FLOOR.ln(),
        }
    }

    fn sample(&self, rng: &mut impl Rng) -> Json {
        let mut r = rng.gen::<f64>();
        for (v, p) in self.values.iter().zip(&self.probs) {
            if r < *p {
                return v.clone();
            }
            r -= p;
        }
        self.values.last().cloned().unwrap_or(Json::Null)
    }
}

enum Density {
    Continuous { log_space: bool, kde: Kde1D },
    IntLattice { kde: Kde1D },
    Categorical(Categorical),
    /// Degenerate fit (insufficient variation): falls back to a uniform
    /// draw over the original spec (spec §4.3.3 "Failure handling").
    UniformFallback(ParamSpec),
}

fn build_density(spec: &ParamSpec, good: &[ParamValue]) -> Density {
    match spec {
        ParamSpec::Uniform { lo, hi } => {
            let points: Vec<f64> = good.iter().filter_map(|v| v.as_f64()).collect();
            match Kde1D::fit(points, *lo, *hi) {
                Some(kde) => Density::Continuous {
                    log_space: false,
                    kde,
                },
                None => Density::UniformFallback(spec.clone()),
            }
        }
        ParamSpec::LogUniform { lo, hi } => {
            let points: Vec<f64> = good.iter().filter_map(|v| v.as_f64()).map(|x| x.ln()).collect();
            match Kde1D::fit(points, lo.ln(), hi.ln()) {
                Some(kde) => Density::Continuous {
                    log_space: true,
                    kde,
                },
                None => Density::UniformFallback(spec.clone()),
            }
        }
        ParamSpec::Int { lo, hi } => {
            let points: Vec<f64> = good.iter().filter_map(|v| v.as_i64()).map(|x| x as f64).collect();
            match Kde1D::fit(points, *lo as f64, *hi as f64) {
                Some(kde) => Density::IntLattice { kde },
                None => Density::UniformFallback(spec.clone()),
            }
        }
        ParamSpec::DiscreteUniform { lo, hi, .. } => {
            let points: Vec<f64> = good.iter().filter_map(|v| v.as_f64()).collect();
            match Kde1D::fit(points, *lo, *hi) {
                Some(kde) => Density::Continuous {
                    log_space: false,
                    kde,
                },
                None => Density::UniformFallback(spec.clone()),
            }
        }
        ParamSpec::Choice { values } => {
            let observed: Vec<Json> = good
                .iter()
                .filter_map(|v| match v {
                    ParamValue::Categorical(j) => Some(j.clone()),
                    _ => None,
                })
                .collect();
            Density::Categorical(Categorical::fit(&observed, values))
        }
    }
}

impl Density {
    fn log_density(&self, value: &ParamValue, spec: &ParamSpec) -> f64 {
        match self {
            Density::Continuous { log_space, kde } => {
                let x = value.as_f64().unwrap_or(kde.lo);
                let t = if *log_space { x.max(f64::MIN_POSITIVE).ln() } else { x };
                kde.log_density(t)
            }
            Density::IntLattice { kde } => {
                let x = value.as_i64().unwrap_or(kde.lo as i64) as f64;
                kde.log_density(x)
            }
            Density::Categorical(c) => match value {
                ParamValue::Categorical(v) => c.log_density(v),
                _ => LOG_FLOOR.ln(),
            },
            Density::UniformFallback(spec_fallback) => spec_fallback.log_density(value),
        }
        .max(LOG_FLOOR.ln())
    }

    fn sample(&self, spec: &ParamSpec, rng: &mut impl Rng) -> ParamValue {
        match self {
            Density::Continuous { log_space, kde } => {
                let t = kde.sample(rng);
                ParamValue::Float(if *log_space { t.exp() } else { t })
            }
            Density::IntLattice { kde } => ParamValue::Int(kde.sample(rng).round() as i64),
            Density::Categorical(c) => ParamValue::Categorical(c.sample(rng)),
            Density::UniformFallback(_) => spec.sample(rng),
        }
    }
}

pub struct TpeSampler {
    rng: StdRng,
    goal: Goal,
    min_obs: usize,
    n_candidates: usize,
    uniform_fraction: f64,
    fallback: RandomSampler,
}

impl TpeSampler {
    pub fn new(opts: SamplerOpts) -> Self {
        let min_obs = opts.u64_opt("min_obs", 10) as usize;
        let n_candidates = opts.u64_opt("n_candidates", 64) as usize;
        let uniform_fraction = opts.f64_opt("uniform_fraction", 0.10);
        let seed = opts.seed;
        let goal = opts.goal;
        Self {
            rng: rng_from_seed(hopt_types::derive_tagged_seed(seed, "tpe")),
            goal,
            min_obs,
            n_candidates,
            uniform_fraction,
            fallback: RandomSampler::new(SamplerOpts::new(seed, goal)),
        }
    }
}

impl Sampler for TpeSampler {
    fn next(
        &mut self,
        space: &StaticSpace,
        trial_index: u64,
        history: &HistorySnapshot,
    ) -> HoptResult<ParamMap> {
        let mut succeeded: Vec<_> = history.succeeded().collect();
        let n = succeeded.len();
        if n < self.min_obs {
            // spec §8 "TPE fallback": identical to RandomSearch seeded from the same state.
            return self.fallback.next(space, trial_index, history);
        }

        succeeded.sort_by(|a, b| {
            let (sa, sb) = (a.score.unwrap(), b.score.unwrap());
            match self.goal {
                Goal::Minimize => sa.partial_cmp(&sb).unwrap(),
                Goal::Maximize => sb.partial_cmp(&sa).unwrap(),
            }
        });

        let gamma = (0.25f64).min((n as f64).sqrt() / n as f64);
        let n_good = ((gamma * n as f64).round() as usize).max(1).min(n);
        let (good_trials, bad_trials) = succeeded.split_at(n_good);

        let mut best: Option<(f64, ParamMap)> = None;
        for _ in 0..self.n_candidates.max(1) {
            let uniform_candidate = self.rng.gen::<f64>() < self.uniform_fraction;
            let mut candidate = ParamMap::new();
            let mut score = 0.0;
            for p in &space.params {
                let good_values: Vec<ParamValue> = good_trials
                    .iter()
                    .filter_map(|t| t.params.get(&p.name).cloned())
                    .collect();
                let bad_values: Vec<ParamValue> = bad_trials
                    .iter()
                    .filter_map(|t| t.params.get(&p.name).cloned())
                    .collect();

                let value = if uniform_candidate {
                    p.spec.sample(&mut self.rng)
                } else {
                    let good_density = build_density(&p.spec, &good_values);
                    good_density.sample(&p.spec, &mut self.rng)
                };

                let l = build_density(&p.spec, &good_values);
                let g = build_density(&p.spec, &bad_values);
                score += l.log_density(&value, &p.spec) - g.log_density(&value, &p.spec);

                candidate.insert(p.name.clone(), value);
            }

            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((_, params)) => Ok(params),
            None => {
                debug!("tpe candidate generation produced nothing, falling back to random");
                self.fallback.next(space, trial_index, history)
            }
        }
    }

    fn name(&self) -> &'static str {
        "tpe"
    }
}
