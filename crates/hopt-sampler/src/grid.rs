//! Grid sampler (spec §4.3.2): deterministic enumeration of the Cartesian
//! product of per-parameter grids, wrapping once exhausted.

use hopt_space::StaticSpace;
use hopt_types::{rng_from_seed, HistorySnapshot, HoptResult, ParamMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{Sampler, SamplerOpts};

pub struct GridSampler {
    rng: StdRng,
    grid_points: usize,
    shuffle: bool,
    combinations: Option<Vec<ParamMap>>,
}

impl GridSampler {
    pub fn new(opts: SamplerOpts) -> Self {
        Self {
            rng: rng_from_seed(hopt_types::derive_tagged_seed(opts.seed, "grid")),
            grid_points: opts.u64_opt("grid_points", 5) as usize,
            shuffle: opts.bool_opt("shuffle", false),
            combinations: None,
        }
    }

    fn build(&mut self, space: &StaticSpace) -> Vec<ParamMap> {
        let mut combos: Vec<ParamMap> = vec![ParamMap::new()];
        for p in &space.params {
            let values = p.spec.grid_values(self.grid_points);
            let mut next_combos = Vec::with_capacity(combos.len() * values.len().max(1));
            for combo in &combos {
                for v in &values {
                    let mut extended = combo.clone();
                    extended.insert(p.name.clone(), v.clone());
                    next_combos.push(extended);
                }
            }
            combos = next_combos;
        }
        if self.shuffle {
            combos.shuffle(&mut self.rng);
        }
        combos
    }
}

impl Sampler for GridSampler {
    fn next(
        &mut self,
        space: &StaticSpace,
        trial_index: u64,
        _history: &HistorySnapshot,
    ) -> HoptResult<ParamMap> {
        if self.combinations.is_none() {
            self.combinations = Some(self.build(space));
        }
        let combos = self.combinations.as_ref().unwrap();
        if combos.is_empty() {
            return Ok(ParamMap::new());
        }
        let idx = (trial_index as usize) % combos.len();
        Ok(combos[idx].clone())
    }

    fn name(&self) -> &'static str {
        "grid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_space::ParamSpec;
    use hopt_types::Goal;
    use serde_json::json;

    fn space() -> StaticSpace {
        StaticSpace::new()
            .push("lr", ParamSpec::Choice {
                values: vec![json!(1e-4), json!(1e-3), json!(1e-2)],
            })
            .push("opt", ParamSpec::Choice {
                values: vec![json!("adam"), json!("sgd")],
            })
            .push("dropout", ParamSpec::Uniform { lo: 0.0, hi: 0.5 })
    }

    #[test]
    fn enumerates_all_combinations_deterministically() {
        let mut opts = SamplerOpts::new(1, Goal::Minimize);
        opts.extra = json!({ "grid_points": 5 });
        let mut sampler = GridSampler::new(opts);
        let history = HistorySnapshot::default();
        let mut seen = std::collections::HashSet::new();
        for ix in 0..30 {
            let params = sampler.next(&space(), ix, &history).unwrap();
            seen.insert(format!("{:?}", params));
        }
        assert_eq!(seen.len(), 30, "3*2*5 = 30 distinct combinations");
    }

    #[test]
    fn wraps_after_exhaustion() {
        let mut opts = SamplerOpts::new(1, Goal::Minimize);
        opts.extra = json!({ "grid_points": 5 });
        let mut sampler = GridSampler::new(opts);
        let history = HistorySnapshot::default();
        let first = sampler.next(&space(), 0, &history).unwrap();
        for ix in 1..30 {
            sampler.next(&space(), ix, &history).unwrap();
        }
        let wrapped = sampler.next(&space(), 30, &history).unwrap();
        assert_eq!(first, wrapped);
    }
}
