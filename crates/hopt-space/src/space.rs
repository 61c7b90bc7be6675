//! The search space itself: a static mapping, or a function of trial index
//! to permit conditional parameters (spec §3 "SearchSpace spec").

use std::sync::Arc;

use hopt_types::ValidationError;
use serde::{Deserialize, Serialize};

use crate::distributions::ParamSpec;

/// One named dimension, order-preserving within its space (order matters
/// for `GridSampler`'s deterministic Cartesian product, spec §4.3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub spec: ParamSpec,
}

/// A concrete search space for one trial index: an ordered list of
/// parameter definitions. A parameter may be absent here even though it
/// appears for other trial indices (spec §3: "a parameter may be absent
/// for certain trials").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticSpace {
    pub params: Vec<ParamDef>,
}

impl StaticSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            spec,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.spec)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for p in &self.params {
            p.spec.validate(&p.name)?;
        }
        Ok(())
    }

    /// Cartesian grid size, or `None` if any dimension has no natural grid
    /// count without an explicit `grid_points` (mirrors the teacher's
    /// `SearchSpace::grid_size`).
    pub fn grid_size(&self, grid_points: usize) -> usize {
        self.params
            .iter()
            .map(|p| p.spec.grid_values(grid_points).len().max(1))
            .product()
    }
}

/// A search space is either fixed for the whole study, or recomputed per
/// trial index to express conditional parameters.
pub trait SpaceFn: Send + Sync {
    fn at(&self, trial_index: u64) -> StaticSpace;
}

impl<F> SpaceFn for F
where
    F: Fn(u64) -> StaticSpace + Send + Sync,
{
    fn at(&self, trial_index: u64) -> StaticSpace {
        self(trial_index)
    }
}

#[derive(Clone)]
pub enum SearchSpace {
    Static(StaticSpace),
    Dynamic(Arc<dyn SpaceFn>),
}

impl SearchSpace {
    pub fn static_space(space: StaticSpace) -> Self {
        SearchSpace::Static(space)
    }

    pub fn dynamic(f: impl SpaceFn + 'static) -> Self {
        SearchSpace::Dynamic(Arc::new(f))
    }

    /// Resolve the concrete space for a given trial index (spec §4.3
    /// `space_fn(trial_index)`).
    pub fn at(&self, trial_index: u64) -> StaticSpace {
        match self {
            SearchSpace::Static(s) => s.clone(),
            SearchSpace::Dynamic(f) => f.at(trial_index),
        }
    }
}

impl std::fmt::Debug for SearchSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchSpace::Static(s) => f.debug_tuple("Static").field(s).finish(),
            SearchSpace::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> StaticSpace {
        StaticSpace::new()
            .push("x", ParamSpec::Uniform { lo: -5.0, hi: 5.0 })
            .push("y", ParamSpec::Int { lo: 0, hi: 9 })
    }

    #[test]
    fn static_space_resolves_same_for_every_index() {
        let s = SearchSpace::static_space(space());
        assert_eq!(s.at(0), s.at(41));
    }

    #[test]
    fn dynamic_space_can_vary_by_index() {
        let s = SearchSpace::dynamic(|ix: u64| {
            let mut sp = StaticSpace::new().push("x", ParamSpec::Uniform { lo: 0.0, hi: 1.0 });
            if ix % 2 == 0 {
                sp = sp.push("y", ParamSpec::Int { lo: 0, hi: 1 });
            }
            sp
        });
        assert_eq!(s.at(0).params.len(), 2);
        assert_eq!(s.at(1).params.len(), 1);
    }

    #[test]
    fn grid_size_multiplies_dimensions() {
        let s = space();
        // x: continuous with grid_points=5 -> 5 values; y: int 0..=9 -> 10 values
        assert_eq!(s.grid_size(5), 50);
    }
}
