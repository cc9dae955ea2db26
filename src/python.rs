use numpy::{
    Element, PyArray1, PyArray2, PyArray3, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2,
    PyUntypedArrayMethods,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::model::{ArrayInputs, ReactionNetwork};
use crate::run::{self, OdeRun, RunOptions};
use crate::solver::ModelSolver;
use crate::SimError;

impl From<SimError> for PyErr {
    fn from(err: SimError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

type RunArrays<'py> = (
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
);

type BatchArrays<'py> = (
    Bound<'py, PyArray3<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
);

fn flatten_pyarray2<T: Copy + Element>(
    array: PyReadonlyArray2<T>,
    name: &str,
) -> Result<(usize, usize, Vec<T>), SimError> {
    let shape = array.shape();
    if shape.len() != 2 {
        return Err(SimError::Shape(format!("{name} must be 2-dimensional")));
    }
    let data = array
        .as_slice()
        .map_err(|_| SimError::Shape(format!("{name} must be contiguous")))?;
    Ok((shape[0], shape[1], data.to_vec()))
}

fn read_array1<T: Copy + Element>(
    array: PyReadonlyArray1<T>,
    name: &str,
) -> Result<Vec<T>, SimError> {
    Ok(array
        .as_slice()
        .map_err(|_| SimError::Shape(format!("{name} array must be contiguous")))?
        .to_vec())
}

fn extract_param_rows(
    params: Option<PyReadonlyArray2<f64>>,
) -> Result<Option<Vec<Vec<f64>>>, SimError> {
    params
        .map(|arr| {
            let (rows, width, flat) = flatten_pyarray2(arr, "reaction parameter array")?;
            let mut out = Vec::with_capacity(rows);
            if width == 0 {
                out.resize_with(rows, Vec::new);
            } else {
                for chunk in flat.chunks(width) {
                    out.push(chunk.to_vec());
                }
            }
            Ok(out)
        })
        .transpose()
}

#[allow(clippy::too_many_arguments)]
fn network_from_arrays(
    stoich: PyReadonlyArray2<f64>,
    initial_state: Option<PyReadonlyArray1<f64>>,
    rate_constants: PyReadonlyArray1<f64>,
    reaction_type_codes: PyReadonlyArray1<i32>,
    reaction_type_params: Option<PyReadonlyArray2<f64>>,
    reaction_expressions: Option<Vec<Option<String>>>,
    fixed_species: Option<Vec<bool>>,
    species_ids: Option<Vec<String>>,
    reaction_ids: Option<Vec<String>>,
) -> Result<ReactionNetwork, SimError> {
    let (_, n_species, stoich_vec) = flatten_pyarray2(stoich, "stoichiometry matrix")?;
    // Batch runs supply their own states, so the stored initial state may be zeros.
    let initial = match initial_state {
        Some(arr) => read_array1(arr, "initial_state")?,
        None => vec![0.0; n_species],
    };
    let rate_constants = read_array1(rate_constants, "rate constant")?;
    let codes = read_array1(reaction_type_codes, "reaction type")?;
    ReactionNetwork::from_arrays(ArrayInputs {
        stoich: &stoich_vec,
        n_species,
        initial: &initial,
        rate_constants: &rate_constants,
        reaction_type_codes: &codes,
        reaction_type_params: extract_param_rows(reaction_type_params)?,
        reaction_expressions,
        fixed_species: fixed_species.as_deref(),
        species_ids,
        reaction_ids,
    })
}

fn array2_into_py<'py>(
    py: Python<'py>,
    array: &ndarray::Array2<f64>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    PyArray1::from_iter(py, array.iter().copied()).reshape([array.nrows(), array.ncols()])
}

fn run_into_py<'py>(py: Python<'py>, run: &OdeRun) -> PyResult<RunArrays<'py>> {
    Ok((
        array2_into_py(py, &run.concentrations)?,
        PyArray1::from_iter(py, run.flux_avg.iter().copied()),
        PyArray1::from_iter(py, run.flux_end.iter().copied()),
    ))
}

fn run_batch_into_py<'py>(
    py: Python<'py>,
    solver: &ModelSolver,
    initial_states: PyReadonlyArray2<'py, f64>,
    ode_length: f64,
    options: &RunOptions,
    n_threads: Option<usize>,
) -> PyResult<BatchArrays<'py>> {
    let (_, cols, states) = flatten_pyarray2(initial_states, "initial_states")?;
    if cols != solver.n_species() {
        return Err(PyValueError::new_err(format!(
            "initial_states columns {} do not match number of species {}",
            cols,
            solver.n_species()
        )));
    }
    let runs = py.detach(|| run::run_batch(solver, &states, ode_length, options, n_threads))?;
    let (concentrations, flux_avg, flux_end) = run::stack_runs(&runs);
    let (n_runs, rows, n_species) = concentrations.dim();
    Ok((
        PyArray1::from_iter(py, concentrations.iter().copied()).reshape([n_runs, rows, n_species])?,
        array2_into_py(py, &flux_avg)?,
        array2_into_py(py, &flux_end)?,
    ))
}

/// Integrate a network given as dense arrays and return
/// `(concentrations, flux_avg, flux_end)`.
#[pyfunction(name = "run_ode", signature = (
    stoich,
    initial_state,
    rate_constants,
    reaction_type_codes,
    ode_length,
    reaction_type_params=None,
    reaction_expressions=None,
    fixed_species=None,
    step=None,
    atol=None,
    rtol=None,
    method=None,
    max_steps=None
))]
#[allow(clippy::too_many_arguments)]
pub fn py_run_ode<'py>(
    py: Python<'py>,
    stoich: PyReadonlyArray2<'py, f64>,
    initial_state: PyReadonlyArray1<'py, f64>,
    rate_constants: PyReadonlyArray1<'py, f64>,
    reaction_type_codes: PyReadonlyArray1<'py, i32>,
    ode_length: f64,
    reaction_type_params: Option<PyReadonlyArray2<'py, f64>>,
    reaction_expressions: Option<Vec<Option<String>>>,
    fixed_species: Option<Vec<bool>>,
    step: Option<f64>,
    atol: Option<f64>,
    rtol: Option<f64>,
    method: Option<&str>,
    max_steps: Option<usize>,
) -> PyResult<RunArrays<'py>> {
    let options = RunOptions::with_overrides(step, atol, rtol, method, max_steps)?;
    let network = network_from_arrays(
        stoich,
        Some(initial_state),
        rate_constants,
        reaction_type_codes,
        reaction_type_params,
        reaction_expressions,
        fixed_species,
        None,
        None,
    )?;
    let initial = network.initial_values();
    let solver = run::set_solver(network);
    let result = py.detach(|| run::run_ode(&solver, &initial, ode_length, &options))?;
    run_into_py(py, &result)
}

/// Integrate every row of `initial_states` in parallel. Concentrations come
/// back as `(runs, rows, species)`, NaN-padded where a run stopped early.
#[pyfunction(name = "run_ode_batch", signature = (
    stoich,
    initial_states,
    rate_constants,
    reaction_type_codes,
    ode_length,
    reaction_type_params=None,
    reaction_expressions=None,
    fixed_species=None,
    n_threads=None,
    step=None,
    atol=None,
    rtol=None,
    method=None,
    max_steps=None
))]
#[allow(clippy::too_many_arguments)]
pub fn py_run_ode_batch<'py>(
    py: Python<'py>,
    stoich: PyReadonlyArray2<'py, f64>,
    initial_states: PyReadonlyArray2<'py, f64>,
    rate_constants: PyReadonlyArray1<'py, f64>,
    reaction_type_codes: PyReadonlyArray1<'py, i32>,
    ode_length: f64,
    reaction_type_params: Option<PyReadonlyArray2<'py, f64>>,
    reaction_expressions: Option<Vec<Option<String>>>,
    fixed_species: Option<Vec<bool>>,
    n_threads: Option<usize>,
    step: Option<f64>,
    atol: Option<f64>,
    rtol: Option<f64>,
    method: Option<&str>,
    max_steps: Option<usize>,
) -> PyResult<BatchArrays<'py>> {
    let options = RunOptions::with_overrides(step, atol, rtol, method, max_steps)?;
    let network = network_from_arrays(
        stoich,
        None,
        rate_constants,
        reaction_type_codes,
        reaction_type_params,
        reaction_expressions,
        fixed_species,
        None,
        None,
    )?;
    let solver = run::set_solver(network);
    run_batch_into_py(py, &solver, initial_states, ode_length, &options, n_threads)
}

/// A reaction network bound to its solver.
#[pyclass(name = "Model", module = "metabolic_ode", frozen)]
pub struct PyModel {
    solver: ModelSolver,
}

#[pymethods]
impl PyModel {
    #[staticmethod]
    fn from_json(text: &str) -> PyResult<Self> {
        let network = ReactionNetwork::from_json(text)?;
        Ok(Self {
            solver: ModelSolver::new(network),
        })
    }

    #[staticmethod]
    #[pyo3(signature = (
        stoich,
        initial_state,
        rate_constants,
        reaction_type_codes,
        reaction_type_params=None,
        reaction_expressions=None,
        fixed_species=None,
        species_ids=None,
        reaction_ids=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn from_arrays(
        stoich: PyReadonlyArray2<f64>,
        initial_state: PyReadonlyArray1<f64>,
        rate_constants: PyReadonlyArray1<f64>,
        reaction_type_codes: PyReadonlyArray1<i32>,
        reaction_type_params: Option<PyReadonlyArray2<f64>>,
        reaction_expressions: Option<Vec<Option<String>>>,
        fixed_species: Option<Vec<bool>>,
        species_ids: Option<Vec<String>>,
        reaction_ids: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let network = network_from_arrays(
            stoich,
            Some(initial_state),
            rate_constants,
            reaction_type_codes,
            reaction_type_params,
            reaction_expressions,
            fixed_species,
            species_ids,
            reaction_ids,
        )?;
        Ok(Self {
            solver: ModelSolver::new(network),
        })
    }

    #[getter]
    fn species_ids(&self) -> Vec<String> {
        self.solver.network().species_ids()
    }

    #[getter]
    fn reaction_ids(&self) -> Vec<String> {
        self.solver.network().reaction_ids()
    }

    fn initial_values<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        PyArray1::from_vec(py, self.solver.network().initial_values())
    }

    fn fluxes<'py>(
        &self,
        py: Python<'py>,
        state: PyReadonlyArray1<'py, f64>,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let state = self.read_state(state)?;
        Ok(PyArray1::from_vec(py, self.solver.fluxes(0.0, &state)))
    }

    fn derivatives<'py>(
        &self,
        py: Python<'py>,
        state: PyReadonlyArray1<'py, f64>,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let state = self.read_state(state)?;
        let mut dydt = vec![0.0; state.len()];
        self.solver.derivatives(0.0, &state, &mut dydt);
        Ok(PyArray1::from_vec(py, dydt))
    }

    #[pyo3(signature = (
        ode_length,
        initial_state=None,
        step=None,
        atol=None,
        rtol=None,
        method=None,
        max_steps=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn run<'py>(
        &self,
        py: Python<'py>,
        ode_length: f64,
        initial_state: Option<PyReadonlyArray1<'py, f64>>,
        step: Option<f64>,
        atol: Option<f64>,
        rtol: Option<f64>,
        method: Option<&str>,
        max_steps: Option<usize>,
    ) -> PyResult<RunArrays<'py>> {
        let options = RunOptions::with_overrides(step, atol, rtol, method, max_steps)?;
        let initial = match initial_state {
            Some(arr) => self.read_state(arr)?,
            None => self.solver.network().initial_values(),
        };
        let solver = &self.solver;
        let result = py.detach(|| run::run_ode(solver, &initial, ode_length, &options))?;
        run_into_py(py, &result)
    }

    #[pyo3(signature = (
        initial_states,
        ode_length,
        n_threads=None,
        step=None,
        atol=None,
        rtol=None,
        method=None,
        max_steps=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn run_batch<'py>(
        &self,
        py: Python<'py>,
        initial_states: PyReadonlyArray2<'py, f64>,
        ode_length: f64,
        n_threads: Option<usize>,
        step: Option<f64>,
        atol: Option<f64>,
        rtol: Option<f64>,
        method: Option<&str>,
        max_steps: Option<usize>,
    ) -> PyResult<BatchArrays<'py>> {
        let options = RunOptions::with_overrides(step, atol, rtol, method, max_steps)?;
        run_batch_into_py(py, &self.solver, initial_states, ode_length, &options, n_threads)
    }
}

impl PyModel {
    fn read_state(&self, state: PyReadonlyArray1<f64>) -> Result<Vec<f64>, SimError> {
        let state = read_array1(state, "state")?;
        if state.len() != self.solver.n_species() {
            return Err(SimError::Shape(format!(
                "state length {} does not match number of species {}",
                state.len(),
                self.solver.n_species()
            )));
        }
        Ok(state)
    }
}

#[pymodule]
fn metabolic_ode(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(py_run_ode, module)?)?;
    module.add_function(wrap_pyfunction!(py_run_ode_batch, module)?)?;
    module.add_class::<PyModel>()?;
    Ok(())
}
