//! Patient, Threshold and Wilcoxon pruners (spec §4.4.4): adaptive policies
//! that judge a trial against its own trajectory or a reference curve rather
//! than its peers.

use std::collections::HashMap;

use hopt_types::{Goal, TrialId};

use crate::{Pruner, PrunerInput, PrunerOpts};

/// Prunes a trial that has shown no improvement over its own best-so-far
/// score for `patience` consecutive rungs.
pub struct PatientPruner {
    goal: Goal,
    patience: u64,
    n_warmup_steps: u64,
    state: HashMap<TrialId, (f64, u64)>,
}

impl PatientPruner {
    pub fn new(opts: PrunerOpts) -> Self {
        Self {
            goal: opts.goal,
            patience: opts.u64_opt("patience", 3),
            n_warmup_steps: opts.u64_opt("n_warmup_steps", 0),
            state: HashMap::new(),
        }
    }

    fn improved(&self, candidate: f64, best: f64) -> bool {
        match self.goal {
            Goal::Minimize => candidate < best,
            Goal::Maximize => candidate > best,
        }
    }
}

impl Pruner for PatientPruner {
    fn keep(&mut self, input: PrunerInput) -> bool {
        if input.rung < self.n_warmup_steps {
            self.state.insert(input.trial_id, (input.latest_value, 0));
            return true;
        }

        let entry = self
            .state
            .entry(input.trial_id)
            .or_insert((input.latest_value, 0));

        if self.improved(input.latest_value, entry.0) {
            entry.0 = input.latest_value;
            entry.1 = 0;
        } else {
            entry.1 += 1;
        }

        entry.1 < self.patience
    }

    fn name(&self) -> &'static str {
        "patient"
    }
}

/// Prunes once a trial's latest score falls outside a fixed `[lower, upper]`
/// band, after an initial `n_warmup_steps` grace period.
pub struct ThresholdPruner {
    lower: f64,
    upper: f64,
    n_warmup_steps: u64,
}

impl ThresholdPruner {
    pub fn new(opts: PrunerOpts) -> Self {
        Self {
            lower: opts.f64_opt("lower", f64::NEG_INFINITY),
            upper: opts.f64_opt("upper", f64::INFINITY),
            n_warmup_steps: opts.u64_opt("n_warmup_steps", 0),
        }
    }
}

impl Pruner for ThresholdPruner {
    fn keep(&mut self, input: PrunerInput) -> bool {
        if input.rung < self.n_warmup_steps {
            return true;
        }
        input.latest_value >= self.lower && input.latest_value <= self.upper
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

/// Prunes when a Wilcoxon signed-rank test of `own_history` against a
/// configured reference curve rejects the null hypothesis of no difference
/// at significance level `alpha`, in the direction unfavorable to `goal`.
pub struct WilcoxonPruner {
    goal: Goal,
    reference: Vec<f64>,
    alpha: f64,
    n_startup_rungs: u64,
}

impl WilcoxonPruner {
    pub fn new(opts: PrunerOpts) -> Self {
        Self {
            goal: opts.goal,
            reference: opts.f64_array_opt("reference"),
            alpha: opts.f64_opt("alpha", 0.05),
            n_startup_rungs: opts.u64_opt("n_startup_rungs", 4),
        }
    }

    /// Two-sided normal-approximation Wilcoxon signed-rank test. Returns
    /// `Some(z)` when there are enough non-zero differences to test, `None`
    /// otherwise (too few samples to draw a conclusion).
    fn signed_rank_z(&self, history: &[f64]) -> Option<f64> {
        let n = history.len().min(self.reference.len());
        if n == 0 {
            return None;
        }
        let mut diffs: Vec<f64> = (0..n)
            .map(|i| history[i] - self.reference[i])
            .filter(|d| d.abs() > 1e-12)
            .collect();
        if diffs.len() < 4 {
            return None;
        }

        diffs.sort_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap());
        let m = diffs.len();
        let mut ranks = vec![0.0; m];
        let mut i = 0;
        while i < m {
            let mut j = i;
            while j + 1 < m && diffs[j + 1].abs() == diffs[i].abs() {
                j += 1;
            }
            let avg_rank = ((i + 1) + (j + 1)) as f64 / 2.0;
            for r in ranks.iter_mut().take(j + 1).skip(i) {
                *r = avg_rank;
            }
            i = j + 1;
        }

        let w_plus: f64 = (0..m).filter(|&k| diffs[k] > 0.0).map(|k| ranks[k]).sum();
        let mean = m as f64 * (m as f64 + 1.0) / 4.0;
        let var = m as f64 * (m as f64 + 1.0) * (2.0 * m as f64 + 1.0) / 24.0;
        if var <= 0.0 {
            return None;
        }
        Some((w_plus - mean) / var.sqrt())
    }
}

impl Pruner for WilcoxonPruner {
    fn keep(&mut self, input: PrunerInput) -> bool {
        if input.rung < self.n_startup_rungs || self.reference.is_empty() {
            return true;
        }
        let Some(z) = self.signed_rank_z(input.own_history) else {
            return true;
        };

        // Standard normal two-sided critical value for alpha (common
        // defaults only; falls back to the 5% critical value otherwise).
        let z_crit = if self.alpha <= 0.01 {
            2.576
        } else if self.alpha <= 0.05 {
            1.96
        } else {
            1.645
        };

        if z.abs() < z_crit {
            return true;
        }

        // A significant positive z means this trial's history ranks above
        // the reference; that is unfavorable when minimizing and favorable
        // when maximizing.
        match self.goal {
            Goal::Minimize => z <= 0.0,
            Goal::Maximize => z >= 0.0,
        }
    }

    fn name(&self) -> &'static str {
        "wilcoxon"
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
    fn patient_prunes_after_sustained_no_improvement() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "patience": 2 });
        let mut pruner = PatientPruner::new(opts);
        let ctx = ctx();
        let trial = id();

        let mut keep = true;
        for (rung, value) in [(0u64, 1.0), (1, 1.0), (2, 1.0), (3, 1.0)] {
            keep = pruner.keep(PrunerInput {
                trial_id: trial,
                rung,
                latest_value: value,
                own_history: &[value],
                peers_at_rung: &[],
                context: &ctx,
            });
        }
        assert!(!keep, "stale score beyond patience must be pruned");
    }

    #[test]
    fn patient_keeps_improving_trial() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "patience": 2 });
        let mut pruner = PatientPruner::new(opts);
        let ctx = ctx();
        let trial = id();

        let mut keep = true;
        for (rung, value) in [(0u64, 3.0), (1, 2.0), (2, 1.0), (3, 0.5)] {
            keep = pruner.keep(PrunerInput {
                trial_id: trial,
                rung,
                latest_value: value,
                own_history: &[value],
                peers_at_rung: &[],
                context: &ctx,
            });
        }
        assert!(keep, "a steadily improving trial must never be pruned");
    }

    #[test]
    fn threshold_prunes_out_of_band_values() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({ "lower": 0.0, "upper": 1.0, "n_warmup_steps": 0 });
        let mut pruner = ThresholdPruner::new(opts);
        let ctx = ctx();

        assert!(!pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 1,
            latest_value: 5.0,
            own_history: &[5.0],
            peers_at_rung: &[],
            context: &ctx,
        }));
        assert!(pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 1,
            latest_value: 0.5,
            own_history: &[0.5],
            peers_at_rung: &[],
            context: &ctx,
        }));
    }

    #[test]
    fn wilcoxon_keeps_without_reference() {
        let opts = PrunerOpts::new(Goal::Minimize);
        let mut pruner = WilcoxonPruner::new(opts);
        let ctx = ctx();
        assert!(pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 10,
            latest_value: 1.0,
            own_history: &[1.0, 2.0, 3.0],
            peers_at_rung: &[],
            context: &ctx,
        }));
    }

    #[test]
    fn wilcoxon_prunes_when_consistently_worse_than_reference() {
        let mut opts = PrunerOpts::new(Goal::Minimize);
        opts.extra = serde_json::json!({
            "reference": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            "n_startup_rungs": 0,
            "alpha": 0.05
        });
        let mut pruner = WilcoxonPruner::new(opts);
        let ctx = ctx();
        let history = vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let keep = pruner.keep(PrunerInput {
            trial_id: id(),
            rung: 5,
            latest_value: *history.last().unwrap(),
            own_history: &history,
            peers_at_rung: &[],
            context: &ctx,
        });
        assert!(!keep, "consistently worse-than-reference history must be pruned when minimizing");
    }
}
