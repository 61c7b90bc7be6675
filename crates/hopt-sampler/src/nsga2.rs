//! NSGA-II (spec §4.3.5): genetic algorithm for multi-objective studies.
//! Ranks a combined parent+offspring population by non-domination and
//! crowding distance, then breeds the next generation by tournament
//! selection, simulated binary crossover, and polynomial mutation.
//!
//! Multi-objective scores are read from `TerminalTrial::metrics` under the
//! keys named in `opts.objectives` (falling back to the single `score` if
//! none are configured), since the core `Trial` model carries one scalar
//! `score` plus a free-form `metrics` map (spec §3).

use hopt_space::{ParamSpec, StaticSpace};
use hopt_types::{rng_from_seed, Goal, HistorySnapshot, HoptResult, ParamMap, ParamValue, TerminalTrial};
use rand::rngs::StdRng;
use rand::Rng;

use crate::random::RandomSampler;
use crate::{Sampler, SamplerOpts};

const ETA_CROSSOVER: f64 = 15.0;
const ETA_MUTATION: f64 = 20.0;

fn objective_values(t: &TerminalTrial, objectives: &[String], goal: Goal) -> Vec<f64> {
    let sign = match goal {
        Goal::Minimize => 1.0,
        Goal::Maximize => -1.0,
    };
    if objectives.is_empty() {
        vec![sign * t.score.unwrap_or(f64::INFINITY)]
    } else {
        objectives
            .iter()
            .map(|k| sign * t.metrics.get(k).copied().unwrap_or(f64::INFINITY))
            .collect()
    }
}

fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Non-dominated fronts via the standard O(n^2) pairwise-domination sweep.
fn fast_non_dominated_sort(objs: &[Vec<f64>]) -> Vec<Vec<usize>> {
    let n = objs.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = vec![Vec::new()];

    for p in 0..n {
        for q in 0..n {
            if p == q {
                continue;
            }
            if dominates(&objs[p], &objs[q]) {
                dominated_by[p].push(q);
            } else if dominates(&objs[q], &objs[p]) {
                domination_count[p] += 1;
            }
        }
        if domination_count[p] == 0 {
            fronts[0].push(p);
        }
    }

    let mut i = 0;
    while !fronts[i].is_empty() {
        let mut next_front = Vec::new();
        for &p in &fronts[i] {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    next_front.push(q);
                }
            }
        }
        i += 1;
        fronts.push(next_front);
    }
    fronts.pop();
    fronts
}

fn crowding_distance(front: &[usize], objs: &[Vec<f64>]) -> Vec<f64> {
    let n = front.len();
    let mut distance = vec![0.0; n];
    if n == 0 {
        return distance;
    }
    let n_obj = objs[front[0]].len();
    for m in 0..n_obj {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| objs[front[a]][m].partial_cmp(&objs[front[b]][m]).unwrap());
        distance[order[0]] = f64::INFINITY;
        distance[order[n - 1]] = f64::INFINITY;
        let range = (objs[front[order[n - 1]]][m] - objs[front[order[0]]][m]).max(f64::MIN_POSITIVE);
        for w in 1..n - 1 {
            let prev = objs[front[order[w - 1]]][m];
            let next = objs[front[order[w + 1]]][m];
            distance[order[w]] += (next - prev) / range;
        }
    }
    distance
}

pub struct Nsga2Sampler {
    rng: StdRng,
    goal: Goal,
    population_size: usize,
    objectives: Vec<String>,
    fallback: RandomSampler,
}

impl Nsga2Sampler {
    pub fn new(opts: SamplerOpts) -> Self {
        let population_size = opts.u64_opt("population_size", 20) as usize;
        let objectives: Vec<String> = opts
            .extra
            .get("objectives")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let seed = opts.seed;
        let goal = opts.goal;
        Self {
            rng: rng_from_seed(hopt_types::derive_tagged_seed(seed, "nsga2")),
            goal,
            population_size: population_size.max(2),
            objectives,
            fallback: RandomSampler::new(SamplerOpts::new(seed, goal)),
        }
    }

    fn sbx(&mut self, a: f64, b: f64, lo: f64, hi: f64) -> f64 {
        let u: f64 = self.rng.gen();
        let beta = if u <= 0.5 {
            (2.0 * u).powf(1.0 / (ETA_CROSSOVER + 1.0))
        } else {
            (1.0 / (2.0 * (1.0 - u))).powf(1.0 / (ETA_CROSSOVER + 1.0))
        };
        let child = 0.5 * ((a + b) - beta * (b - a).abs());
        child.clamp(lo, hi)
    }

    fn polynomial_mutation(&mut self, x: f64, lo: f64, hi: f64) -> f64 {
        let u: f64 = self.rng.gen();
        let range = (hi - lo).max(f64::MIN_POSITIVE);
        let delta = if u < 0.5 {
            (2.0 * u).powf(1.0 / (ETA_MUTATION + 1.0)) - 1.0
        } else {
            1.0 - (2.0 * (1.0 - u)).powf(1.0 / (ETA_MUTATION + 1.0))
        };
        (x + delta * range).clamp(lo, hi)
    }
}

impl Sampler for Nsga2Sampler {
    fn next(
        &mut self,
        space: &StaticSpace,
        trial_index: u64,
        history: &HistorySnapshot,
    ) -> HoptResult<ParamMap> {
        let scored: Vec<&TerminalTrial> = history.trials.iter().filter(|t| t.score.is_some()).collect();
        if scored.len() < self.population_size {
            return self.fallback.next(space, trial_index, history);
        }

        let objs: Vec<Vec<f64>> = scored
            .iter()
            .map(|t| objective_values(t, &self.objectives, self.goal))
            .collect();
        let fronts = fast_non_dominated_sort(&objs);

        let mut ranked: Vec<usize> = Vec::new();
        for front in &fronts {
            let distances = crowding_distance(front, &objs);
            let mut indexed: Vec<(usize, f64)> = front.iter().copied().zip(distances).collect();
            indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            ranked.extend(indexed.into_iter().map(|(i, _)| i));
            if ranked.len() >= self.population_size {
                break;
            }
        }
        ranked.truncate(self.population_size.min(ranked.len()));

        let parent_a = &scored[ranked[self.rng.gen_range(0..ranked.len())]].params;
        let parent_b = &scored[ranked[self.rng.gen_range(0..ranked.len())]].params;

        let mut child = ParamMap::new();
        for p in &space.params {
            let value = match &p.spec {
                ParamSpec::Uniform { lo, hi } | ParamSpec::DiscreteUniform { lo, hi, .. } => {
                    let a = parent_a.get(&p.name).and_then(|v| v.as_f64()).unwrap_or(*lo);
                    let b = parent_b.get(&p.name).and_then(|v| v.as_f64()).unwrap_or(*hi);
                    let crossed = self.sbx(a, b, *lo, *hi);
                    ParamValue::Float(self.polynomial_mutation(crossed, *lo, *hi))
                }
                ParamSpec::LogUniform { lo, hi } => {
                    let (log_lo, log_hi) = (lo.ln(), hi.ln());
                    let a = parent_a.get(&p.name).and_then(|v| v.as_f64()).unwrap_or(*lo).ln();
                    let b = parent_b.get(&p.name).and_then(|v| v.as_f64()).unwrap_or(*hi).ln();
                    let crossed = self.sbx(a, b, log_lo, log_hi);
                    ParamValue::Float(self.polynomial_mutation(crossed, log_lo, log_hi).exp())
                }
                ParamSpec::Int { lo, hi } => {
                    let a = parent_a.get(&p.name).and_then(|v| v.as_i64()).unwrap_or(*lo) as f64;
                    let b = parent_b.get(&p.name).and_then(|v| v.as_i64()).unwrap_or(*hi) as f64;
                    let crossed = self.sbx(a, b, *lo as f64, *hi as f64);
                    ParamValue::Int(crossed.round().clamp(*lo as f64, *hi as f64) as i64)
                }
                ParamSpec::Choice { .. } => {
                    // Uniform resampling for categorical genes (spec §4.3.5).
                    p.spec.sample(&mut self.rng)
                }
            };
            child.insert(p.name.clone(), value);
        }
        Ok(child)
    }

    fn name(&self) -> &'static str {
        "nsga2"
    }
}
