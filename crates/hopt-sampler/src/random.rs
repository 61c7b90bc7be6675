//! RandomSearch (spec §4.3.1): independent draws from each per-parameter
//! distribution. Stateless beyond the RNG, used as the baseline and as the
//! fallback warm-up for TPE/CMA-ES.

use hopt_space::StaticSpace;
use hopt_types::{rng_from_seed, HistorySnapshot, HoptResult, ParamMap};
use rand::rngs::StdRng;

use crate::{Sampler, SamplerOpts};

pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(opts: SamplerOpts) -> Self {
        Self {
            rng: rng_from_seed(hopt_types::derive_tagged_seed(opts.seed, "random")),
        }
    }
}

impl Sampler for RandomSampler {
    fn next(
        &mut self,
        space: &StaticSpace,
        _trial_index: u64,
        _history: &HistorySnapshot,
    ) -> HoptResult<ParamMap> {
        Ok(space
            .params
            .iter()
            .map(|p| (p.name.clone(), p.spec.sample(&mut self.rng)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_space::ParamSpec;
    use hopt_types::Goal;

    fn space() -> StaticSpace {
        StaticSpace::new()
            .push("x", ParamSpec::Uniform { lo: -5.0, hi: 5.0 })
            .push("y", ParamSpec::Int { lo: 0, hi: 9 })
    }

    #[test]
    fn same_seed_produces_same_sequence() {
        let mut a = RandomSampler::new(SamplerOpts::new(42, Goal::Minimize));
        let mut b = RandomSampler::new(SamplerOpts::new(42, Goal::Minimize));
        let history = HistorySnapshot::default();
        for ix in 0..10 {
            let pa = a.next(&space(), ix, &history).unwrap();
            let pb = b.next(&space(), ix, &history).unwrap();
            assert_eq!(pa, pb);
        }
    }

    #[test]
    fn every_draw_satisfies_space_bounds() {
        let mut s = RandomSampler::new(SamplerOpts::new(1, Goal::Minimize));
        let history = HistorySnapshot::default();
        for ix in 0..200 {
            let params = s.next(&space(), ix, &history).unwrap();
            let x = params["x"].as_f64().unwrap();
            let y = params["y"].as_i64().unwrap();
            assert!((-5.0..=5.0).contains(&x));
            assert!((0..=9).contains(&y));
        }
    }
}
