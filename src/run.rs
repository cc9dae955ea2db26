//! Fixed sub-step driver: advances a model over one communication timestep
//! and collects concentration and flux trajectories.

use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, Axis};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::integrator::{Integrator, IntegratorSettings, IntegratorStats, Method, OdeError};
use crate::model::ReactionNetwork;
use crate::solver::ModelSolver;
use crate::{SimError, TIME_EPSILON};

/// Sub-step between recorded rows, in seconds.
pub const DEFAULT_STEP: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub step: f64,
    pub settings: IntegratorSettings,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            settings: IntegratorSettings::default(),
        }
    }
}

impl RunOptions {
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Defaults with the keyword overrides of the Python entry points applied.
    pub fn with_overrides(
        step: Option<f64>,
        abs_tol: Option<f64>,
        rel_tol: Option<f64>,
        method: Option<&str>,
        max_steps: Option<usize>,
    ) -> Result<Self, SimError> {
        let mut options = Self::default();
        if let Some(step) = step {
            options.step = step;
        }
        if let Some(abs_tol) = abs_tol {
            options.settings.abs_tol = abs_tol;
        }
        if let Some(rel_tol) = rel_tol {
            options.settings.rel_tol = rel_tol;
        }
        if let Some(method) = method {
            options.settings.method = Method::from_str(method).map_err(settings_error)?;
        }
        if let Some(max_steps) = max_steps {
            options.settings.max_steps = max_steps;
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(SimError::InvalidArgument(
                "step must be positive and finite".into(),
            ));
        }
        self.settings.validate().map_err(settings_error)
    }
}

// Bad settings are caller input, not an integration failure.
fn settings_error(err: OdeError) -> SimError {
    match err {
        OdeError::InvalidSettings(msg) => SimError::InvalidArgument(msg),
        other => SimError::Integration(other),
    }
}

/// Result of one [`run_ode`] call.
#[derive(Clone, Debug)]
pub struct OdeRun {
    /// Time of each recorded row; row `k` is taken at `(k + 1) · step`.
    pub times: Vec<f64>,
    /// `(rows × species)` concentrations.
    pub concentrations: Array2<f64>,
    /// `(rows × reactions)` fluxes evaluated at each recorded row.
    pub fluxes: Array2<f64>,
    pub flux_avg: Array1<f64>,
    pub flux_end: Array1<f64>,
    /// False when the integrator failed before the last sub-step.
    pub completed: bool,
    pub failure: Option<OdeError>,
    pub switched_to_stiff: bool,
    pub stats: IntegratorStats,
}

impl OdeRun {
    pub fn n_rows(&self) -> usize {
        self.times.len()
    }

    pub fn final_state(&self) -> Array1<f64> {
        self.concentrations.row(self.n_rows() - 1).to_owned()
    }
}

/// Build the solver for `network`. Rate laws are evaluated directly, so there
/// is no compilation step and no analytic Jacobian.
pub fn set_solver(network: ReactionNetwork) -> ModelSolver {
    ModelSolver::new(network)
}

pub fn initial_values(network: &ReactionNetwork) -> Vec<f64> {
    network.initial_values()
}

/// Most rows a single run may record.
pub const MAX_ROWS: usize = 10_000_000;

// Rows reserved up front; longer runs grow as they record.
const RESERVED_ROWS: usize = 4096;

/// Number of sub-steps `k` with `(k - 1) · step < ode_length`, at least one.
pub(crate) fn sub_step_count(ode_length: f64, step: f64) -> Result<usize, SimError> {
    let ratio = ode_length / step;
    let rows = (ratio - TIME_EPSILON * ratio.max(1.0)).ceil().max(1.0);
    if !rows.is_finite() || rows > MAX_ROWS as f64 {
        return Err(SimError::InvalidArgument(format!(
            "ode_length / step = {ratio:e} sub-steps exceeds the limit of {MAX_ROWS} rows"
        )));
    }
    Ok(rows as usize)
}

struct TrajectoryRecorder {
    times: Vec<f64>,
    states: Vec<f64>,
    fluxes: Vec<f64>,
    n_species: usize,
    n_reactions: usize,
}

impl TrajectoryRecorder {
    fn with_capacity(
        rows: usize,
        n_species: usize,
        n_reactions: usize,
    ) -> Result<Self, SimError> {
        let rows = rows.min(RESERVED_ROWS);
        let overflow = || SimError::Shape("trajectory buffer size overflows usize".into());
        Ok(Self {
            times: Vec::with_capacity(rows),
            states: Vec::with_capacity(rows.checked_mul(n_species).ok_or_else(overflow)?),
            fluxes: Vec::with_capacity(rows.checked_mul(n_reactions).ok_or_else(overflow)?),
            n_species,
            n_reactions,
        })
    }

    fn record(&mut self, t: f64, state: &[f64], flux: &[f64]) {
        debug_assert_eq!(state.len(), self.n_species);
        debug_assert_eq!(flux.len(), self.n_reactions);
        self.times.push(t);
        self.states.extend_from_slice(state);
        self.fluxes.extend_from_slice(flux);
    }

    fn len(&self) -> usize {
        self.times.len()
    }

    fn finish(self) -> Result<(Vec<f64>, Array2<f64>, Array2<f64>), SimError> {
        let rows = self.times.len();
        let concentrations = Array2::from_shape_vec((rows, self.n_species), self.states)
            .map_err(|e| SimError::Shape(format!("concentration trajectory: {e}")))?;
        let fluxes = Array2::from_shape_vec((rows, self.n_reactions), self.fluxes)
            .map_err(|e| SimError::Shape(format!("flux trajectory: {e}")))?;
        Ok((self.times, concentrations, fluxes))
    }
}

fn validate_run(
    solver: &ModelSolver,
    initial: &[f64],
    ode_length: f64,
    options: &RunOptions,
) -> Result<(), SimError> {
    if initial.len() != solver.n_species() {
        return Err(SimError::Shape(format!(
            "initial state length {} does not match number of species {}",
            initial.len(),
            solver.n_species()
        )));
    }
    if !ode_length.is_finite() || ode_length <= 0.0 {
        return Err(SimError::InvalidArgument(
            "ode_length must be positive and finite".into(),
        ));
    }
    options.validate()
}

/// Integrate `initial` over `[0, ode_length]` on the fixed sub-step grid.
///
/// Each row is the state at the next multiple of `options.step`, together
/// with the reaction fluxes at that state. `flux_avg` is the column mean of
/// the flux rows and `flux_end` the flux at the last row. If the integrator
/// fails part-way, the rows recorded so far are returned with
/// `completed == false`.
pub fn run_ode(
    solver: &ModelSolver,
    initial: &[f64],
    ode_length: f64,
    options: &RunOptions,
) -> Result<OdeRun, SimError> {
    validate_run(solver, initial, ode_length, options)?;
    let n_steps = sub_step_count(ode_length, options.step)?;
    let mut integrator =
        Integrator::new(solver, options.settings.clone()).map_err(settings_error)?;
    integrator.set_initial_value(initial, 0.0)?;

    let mut recorder =
        TrajectoryRecorder::with_capacity(n_steps, solver.n_species(), solver.n_reactions())?;
    let mut flux_row = vec![0.0; solver.n_reactions()];
    let mut failure = None;
    for k in 1..=n_steps {
        let target = k as f64 * options.step;
        match integrator.integrate(target) {
            Ok(state) => {
                solver.fluxes_into(target, state, &mut flux_row);
                recorder.record(target, state, &flux_row);
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if let Some(err) = &failure {
        if recorder.len() == 0 {
            return Err(SimError::Integration(err.clone()));
        }
        warn!(
            recorded = recorder.len(),
            expected = n_steps,
            error = %err,
            "returning partial trajectory"
        );
    }
    let completed = failure.is_none();

    let (times, concentrations, fluxes) = recorder.finish()?;
    let flux_end = fluxes.row(fluxes.nrows() - 1).to_owned();
    let flux_avg = fluxes
        .mean_axis(Axis(0))
        .ok_or_else(|| SimError::Shape("flux trajectory is empty".into()))?;
    let stats = integrator.stats();
    debug!(
        rows = times.len(),
        rhs_evals = stats.rhs_evals,
        accepted = stats.accepted,
        rejected = stats.rejected,
        stiff = integrator.is_stiff(),
        "ode run finished"
    );

    Ok(OdeRun {
        times,
        concentrations,
        fluxes,
        flux_avg,
        flux_end,
        completed,
        failure,
        switched_to_stiff: integrator.is_stiff(),
        stats,
    })
}

/// Run [`run_ode`] for every row of the row-major `initial_states` in
/// parallel, returning the runs in input order.
pub fn run_batch(
    solver: &ModelSolver,
    initial_states: &[f64],
    ode_length: f64,
    options: &RunOptions,
    n_threads: Option<usize>,
) -> Result<Vec<OdeRun>, SimError> {
    let n_species = solver.n_species();
    if initial_states.is_empty() || initial_states.len() % n_species != 0 {
        return Err(SimError::Shape(format!(
            "initial_states length {} is not a positive multiple of species count {}",
            initial_states.len(),
            n_species
        )));
    }

    let simulate = || -> Result<Vec<OdeRun>, SimError> {
        initial_states
            .par_chunks(n_species)
            .map(|state| run_ode(solver, state, ode_length, options))
            .collect()
    };

    match n_threads {
        Some(n) => ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| SimError::ThreadPool(e.to_string()))?
            .install(simulate),
        None => simulate(),
    }
}

/// Stack batch results into `(runs × rows × species)` concentrations and
/// `(runs × reactions)` flux summaries. Rows missing from incomplete runs are
/// filled with NaN.
pub fn stack_runs(runs: &[OdeRun]) -> (Array3<f64>, Array2<f64>, Array2<f64>) {
    let rows = runs.iter().map(OdeRun::n_rows).max().unwrap_or(0);
    let n_species = runs.first().map_or(0, |r| r.concentrations.ncols());
    let n_reactions = runs.first().map_or(0, |r| r.flux_avg.len());
    let mut concentrations = Array3::from_elem((runs.len(), rows, n_species), f64::NAN);
    let mut flux_avg = Array2::zeros((runs.len(), n_reactions));
    let mut flux_end = Array2::zeros((runs.len(), n_reactions));
    for (idx, run) in runs.iter().enumerate() {
        concentrations
            .index_axis_mut(Axis(0), idx)
            .slice_mut(ndarray::s![..run.n_rows(), ..])
            .assign(&run.concentrations);
        flux_avg.row_mut(idx).assign(&run.flux_avg);
        flux_end.row_mut(idx).assign(&run.flux_end);
    }
    (concentrations, flux_avg, flux_end)
}
