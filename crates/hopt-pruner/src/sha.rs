//! Successive Halving (spec §4.4.2): at each scheduled rung, the top `1/η`
//! of trials in the bracket survive; the rest are pruned.

use hopt_types::Goal;

use crate::{Pruner, PrunerInput, PrunerOpts};

pub struct ShaPruner {
    goal: Goal,
    eta: f64,
    rung_schedule: Vec<u64>,
    trials_in_bracket: u64,
}

impl ShaPruner {
    pub fn new(opts: PrunerOpts) -> Self {
        let mut rung_schedule: Vec<u64> = opts
            .extra
            .get("rung_schedule")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_u64()).collect())
            .unwrap_or_else(|| vec![0, 1, 2, 3]);
        rung_schedule.sort_unstable();
        Self {
            goal: opts.goal,
            eta: opts.f64_opt("eta", 3.0),
            rung_schedule,
            trials_in_bracket: 0,
        }
    }

    fn stage_for_rung(&self, rung: u64) -> u32 {
        self.rung_schedule
            .iter()
            .filter(|&&r| r <= rung)
            .count()
            .saturating_sub(1) as u32
    }

    /// At most `ceil(N / eta^k)` survivors at stage `k` (spec §8 "SHA invariant").
    fn allowed_survivors(&self, stage: u32) -> u64 {
        let n = self.trials_in_bracket.max(1) as f64;
        (n / self.eta.powi(stage as i32)).ceil().max(1.0) as u64
    }
}

impl Pruner for ShaPruner {
    fn assign_bracket(&mut self, _trial_index: u64) -> u64 {
        self.trials_in_bracket += 1;
        0
    }

    fn keep(&mut self, input: PrunerInput) -> bool {
        let stage = self.stage_for_rung(input.rung);
        let allowed = self.allowed_survivors(stage);

        let better = |a: f64, b: f64| match self.goal {
            Goal::Minimize => a < b,
            Goal::Maximize => a > b,
        };
        let rank = 1 + input
            .peers_at_rung
            .iter()
            .filter(|(_, v)| better(*v, input.latest_value))
            .count() as u64;

        rank <= allowed
    }

    fn name(&self) -> &'static str {
        "sha"
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

    #[test]
    fn survivors_shrink_geometrically_with_eta() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "eta": 2.0, "rung_schedule": [0, 1, 2] });
        let mut pruner = ShaPruner::new(opts);
        for _ in 0..16 {
            pruner.assign_bracket(0);
        }
        assert_eq!(pruner.allowed_survivors(0), 16);
        assert_eq!(pruner.allowed_survivors(1), 8);
        assert_eq!(pruner.allowed_survivors(2), 4);
    }

    #[test]
    fn keeps_top_fraction_and_prunes_the_rest() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "eta": 2.0, "rung_schedule": [0] });
        let mut pruner = ShaPruner::new(opts);
        for _ in 0..4 {
            pruner.assign_bracket(0);
        }
        let peers: Vec<(TrialId, f64)> = vec![(id(), 1.0), (id(), 2.0), (id(), 3.0)];
        let ctx = crate::PrunerContext {
            study_id: "s1".into(),
            goal: Goal::Minimize,
            bracket: 0,
        };
        let best = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 0,
            latest_value: 0.5,
            own_history: &[0.5],
            peers_at_rung: &peers,
            context: &ctx,
        });
        assert!(best, "top-ranked trial must survive");

        let worst = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 0,
            latest_value: 10.0,
            own_history: &[10.0],
            peers_at_rung: &peers,
            context: &ctx,
        });
        assert!(!worst, "worst-ranked trial must be pruned once N/eta < N");
    }
}
