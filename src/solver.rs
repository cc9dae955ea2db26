use crate::integrator::OdeSystem;
use crate::model::ReactionNetwork;

/// Evaluates derivatives and per-reaction fluxes of a [`ReactionNetwork`].
#[derive(Clone, Debug)]
pub struct ModelSolver {
    network: ReactionNetwork,
    fixed: Vec<bool>,
}

impl ModelSolver {
    pub fn new(network: ReactionNetwork) -> Self {
        let fixed = network.species().iter().map(|s| s.fixed).collect();
        Self { network, fixed }
    }

    pub fn network(&self) -> &ReactionNetwork {
        &self.network
    }

    pub fn n_species(&self) -> usize {
        self.network.n_species()
    }

    pub fn n_reactions(&self) -> usize {
        self.network.n_reactions()
    }

    /// `dydt = Sᵀ · v(y)`, with fixed species held at zero.
    pub fn derivatives(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        debug_assert_eq!(y.len(), self.n_species());
        debug_assert_eq!(dydt.len(), self.n_species());
        dydt.fill(0.0);
        for reaction in self.network.reactions() {
            let rate = reaction.rate(t, y);
            if rate == 0.0 {
                continue;
            }
            for delta in &reaction.deltas {
                dydt[delta.species] += delta.delta * rate;
            }
        }
        for (value, &fixed) in dydt.iter_mut().zip(&self.fixed) {
            if fixed {
                *value = 0.0;
            }
        }
    }

    pub fn fluxes_into(&self, t: f64, y: &[f64], out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.n_reactions());
        for (dst, reaction) in out.iter_mut().zip(self.network.reactions()) {
            *dst = reaction.rate(t, y);
        }
    }

    pub fn fluxes(&self, t: f64, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_reactions()];
        self.fluxes_into(t, y, &mut out);
        out
    }
}

impl OdeSystem for ModelSolver {
    fn dimension(&self) -> usize {
        self.n_species()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        self.derivatives(t, y, dydt)
    }
}
