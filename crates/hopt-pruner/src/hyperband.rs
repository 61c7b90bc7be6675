//! Hyperband (spec §4.4.3): runs several Successive Halving brackets with
//! different `(r_0, R)` budget allocations, round-robining new trials across
//! them.

use crate::sha::ShaPruner;
use crate::{Pruner, PrunerInput, PrunerOpts};

pub struct HyperbandPruner {
    eta: f64,
    brackets: Vec<ShaPruner>,
    next_bracket: u64,
}

impl HyperbandPruner {
    pub fn new(opts: PrunerOpts) -> Self {
        let eta = opts.f64_opt("eta", 3.0);
        let max_resource = opts.u64_opt("max_resource", 81);
        let s_max = (max_resource as f64).log(eta).floor() as u32;

        let brackets = (0..=s_max)
            .map(|s| {
                let r0 = s;
                let r_max = s_max;
                let rung_schedule: Vec<u64> = (r0..=r_max).collect();
                let mut bracket_opts = opts.clone();
                bracket_opts.extra = serde_json::json!({ "eta": eta, "rung_schedule": rung_schedule });
                ShaPruner::new(bracket_opts)
            })
            .collect();

        Self {
            eta,
            brackets,
            next_bracket: 0,
        }
    }
}

impl Pruner for HyperbandPruner {
    fn assign_bracket(&mut self, trial_index: u64) -> u64 {
        let n = self.brackets.len().max(1) as u64;
        let bracket = self.next_bracket % n;
        self.next_bracket += 1;
        self.brackets[bracket as usize].assign_bracket(trial_index);
        bracket
    }

    fn keep(&mut self, input: PrunerInput) -> bool {
        let bracket = input.context.bracket as usize;
        match self.brackets.get_mut(bracket) {
            Some(b) => b.keep(input),
            None => true,
        }
    }

    fn name(&self) -> &'static str {
        "hyperband"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_types::Goal;

    #[test]
    fn assigns_brackets_round_robin() {
        let opts = PrunerOpts::new(Goal::Minimize);
        let mut pruner = HyperbandPruner::new(opts);
        let n = pruner.brackets.len() as u64;
        let assigned: Vec<u64> = (0..n * 2).map(|ix| pruner.assign_bracket(ix)).collect();
        for (i, &b) in assigned.iter().enumerate() {
            assert_eq!(b, i as u64 % n);
        }
    }

    #[test]
    fn bracket_count_derives_from_max_resource_and_eta() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "eta": 3.0, "max_resource": 81 });
        let pruner = HyperbandPruner::new(opts);
        // log_3(81) = 4, so s_max = 4, yielding 5 brackets (0..=4).
        assert_eq!(pruner.brackets.len(), 5);
    }
}
