//! Deterministic integration of metabolic reaction networks.
//!
//! This crate is the ODE half of a hybrid stochastic/deterministic whole-cell
//! simulation. Over one communication timestep it advances metabolite
//! concentrations on a fixed sub-step grid, records the concentration and
//! per-reaction flux trajectories, and reports the mean flux over the
//! timestep together with the flux at its end.
//!
//! ```
//! use metabolic_ode::{ModelDefinition, ReactionNetwork, RunOptions, run_ode, set_solver};
//!
//! let json = r#"{
//!     "species": [{"id": "A", "initial": 1.0}, {"id": "B", "initial": 0.0}],
//!     "reactions": [{
//!         "id": "conv",
//!         "stoichiometry": {"A": -1.0, "B": 1.0},
//!         "rate_law": {"type": "mass_action", "k": 2.0}
//!     }]
//! }"#;
//! let definition = ModelDefinition::from_json(json).unwrap();
//! let network = ReactionNetwork::from_definition(&definition).unwrap();
//! let y0 = network.initial_values();
//! let solver = set_solver(network);
//! let run = run_ode(&solver, &y0, 0.1, &RunOptions::default()).unwrap();
//! assert_eq!(run.concentrations.nrows(), 10);
//! assert!((run.final_state()[0] - (-0.2_f64).exp()).abs() < 1e-5);
//! ```
//!
//! Build with the `python` feature (or `extension-module` through maturin) to
//! expose the same entry points to Python as numpy arrays.

use thiserror::Error;

pub mod integrator;
pub mod model;
#[cfg(feature = "python")]
mod python;
pub mod run;
pub mod solver;

pub use integrator::{
    FnSystem, Integrator, IntegratorSettings, IntegratorStats, Method, OdeError, OdeSystem,
};
pub use model::{
    ArrayInputs, ModelDefinition, RateLaw, RateLawDefinition, Reaction, ReactionDefinition,
    ReactionNetwork, ReactionTypeCode, Species, SpeciesDefinition,
};
pub use run::{
    DEFAULT_STEP, MAX_ROWS, OdeRun, RunOptions, initial_values, run_batch, run_ode, set_solver,
    stack_runs,
};
pub use solver::ModelSolver;

const TIME_EPSILON: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    #[error("integration failed: {0}")]
    Integration(#[from] OdeError),
    #[error("model definition error: {0}")]
    Json(#[from] serde_json::Error),
}
