//! Median / Percentile pruner (spec §4.4.1): prunes a trial whose latest
//! reported score is on the wrong side of the `p`-th percentile of its
//! peers' scores at the same rung.

use hopt_types::Goal;

use crate::{Pruner, PrunerInput, PrunerOpts};

pub struct MedianPruner {
    goal: Goal,
    percentile: f64,
    n_warmup_trials: u64,
    n_startup_trials: u64,
    trials_assigned: u64,
}

impl MedianPruner {
    pub fn new(opts: PrunerOpts, default_percentile: f64) -> Self {
        Self {
            goal: opts.goal,
            percentile: opts.f64_opt("percentile", default_percentile),
            n_warmup_trials: opts.u64_opt("n_warmup_trials", 1),
            n_startup_trials: opts.u64_opt("n_startup_trials", 5),
            trials_assigned: 0,
        }
    }
}

impl Pruner for MedianPruner {
    fn assign_bracket(&mut self, _trial_index: u64) -> u64 {
        self.trials_assigned += 1;
        0
    }

    fn keep(&mut self, input: PrunerInput) -> bool {
        if self.trials_assigned <= self.n_startup_trials {
            return true;
        }
        if (input.peers_at_rung.len() as u64) < self.n_warmup_trials {
            return true;
        }
        let mut values: Vec<f64> = input.peers_at_rung.iter().map(|(_, v)| *v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((self.percentile / 100.0) * (values.len() - 1) as f64).round() as usize;
        let threshold = values[idx];
        match self.goal {
            Goal::Minimize => input.latest_value <= threshold,
            Goal::Maximize => input.latest_value >= threshold,
        }
    }

    fn name(&self) -> &'static str {
        "median"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_types::TrialId;
    use uuid::Uuid;

    fn id() -> TrialId {
        Uuid::new_v4()
    }

    fn ctx() -> crate::PrunerContext {
        crate::PrunerContext {
            study_id: "s1".into(),
            goal: Goal::Minimize,
            bracket: 0,
        }
    }

    #[test]
    fn no_pruning_before_startup_threshold() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "n_startup_trials": 3 });
        let mut pruner = MedianPruner::new(opts, 50.0);
        for _ in 0..2 {
            pruner.assign_bracket(0);
        }
        let ctx = ctx();
        let keep = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 1,
            latest_value: 1000.0,
            own_history: &[1000.0],
            peers_at_rung: &[(id(), 1.0), (id(), 2.0)],
            context: &ctx,
        });
        assert!(keep, "must not prune before n_startup_trials is reached");
    }

    #[test]
    fn prunes_worse_half_for_minimize() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "n_startup_trials": 0, "n_warmup_trials": 1 });
        let mut pruner = MedianPruner::new(opts, 50.0);
        pruner.assign_bracket(0);
        pruner.assign_bracket(1);
        let ctx = ctx();
        let peers: Vec<(TrialId, f64)> = vec![(id(), 1.0), (id(), 2.0), (id(), 3.0), (id(), 4.0), (id(), 5.0)];
        let keep_bad = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 1,
            latest_value: 10.0,
            own_history: &[10.0],
            peers_at_rung: &peers,
            context: &ctx,
        });
        assert!(!keep_bad, "a much-worse-than-median score must be pruned");

        let keep_good = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 1,
            latest_value: 0.5,
            own_history: &[0.5],
            peers_at_rung: &peers,
            context: &ctx,
        });
        assert!(keep_good, "a better-than-median score must not be pruned");
    }
}
