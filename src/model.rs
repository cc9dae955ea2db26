//! Reaction-network model: species, reactions and their rate laws.
//!
//! A network can be assembled from dense arrays (the layout the Python side
//! hands over) or from a JSON [`ModelDefinition`]. Both paths share the same
//! validation, so a [`ReactionNetwork`] that exists is always internally
//! consistent: indices are in range, parameters are positive and every
//! expression binds only known variables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use meval::{Context, ContextProvider, Expr};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SimError;

/// Names an expression can use besides species.
const RESERVED_NAMES: [&str; 2] = ["t", "k"];

#[derive(Clone, Debug, PartialEq)]
pub struct Species {
    pub id: String,
    pub initial: f64,
    /// Boundary species keep their concentration; their derivative is zero.
    pub fixed: bool,
}

#[derive(Clone, Debug)]
struct Reactant {
    species: usize,
    order: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct SpeciesDelta {
    pub(crate) species: usize,
    pub(crate) delta: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionTypeCode {
    MassAction = 0,
    Hill = 1,
    MichaelisMenten = 2,
    Expression = 3,
    ReversibleMassAction = 4,
}

impl TryFrom<i32> for ReactionTypeCode {
    type Error = SimError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::MassAction),
            1 => Ok(Self::Hill),
            2 => Ok(Self::MichaelisMenten),
            3 => Ok(Self::Expression),
            4 => Ok(Self::ReversibleMassAction),
            other => Err(SimError::InvalidArgument(format!(
                "unsupported reaction type code {} (expected 0=mass-action, 1=Hill, \
                 2=Michaelis-Menten, 3=expression, or 4=reversible mass-action)",
                other
            ))),
        }
    }
}

/// A species reference resolved at build time for an expression rate law.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub(crate) name: String,
    pub(crate) species: usize,
}

#[derive(Clone, Debug)]
pub enum RateLaw {
    MassAction,
    ReversibleMassAction {
        k_rev: f64,
    },
    Hill {
        activator: usize,
        hill_n: f64,
        k_half: f64,
        k_half_pow_n: f64, // Cached k_half^hill_n
    },
    MichaelisMenten {
        substrate: usize,
        k_m: f64,
    },
    Expression {
        expr: Expr,
        bindings: Vec<Binding>,
    },
}

#[derive(Clone, Debug)]
pub struct Reaction {
    pub id: String,
    pub rate_constant: f64,
    reactants: Vec<Reactant>,
    products: Vec<Reactant>,
    pub(crate) deltas: Vec<SpeciesDelta>,
    pub law: RateLaw,
}

struct ExpressionContext<'a> {
    bindings: &'a [Binding],
    state: &'a [f64],
    rate_constant: f64,
    t: f64,
}

impl<'a> ContextProvider for ExpressionContext<'a> {
    fn get_var(&self, name: &str) -> Option<f64> {
        match name {
            "t" => Some(self.t),
            "k" => Some(self.rate_constant),
            _ => self
                .bindings
                .iter()
                .find(|binding| binding.name == name)
                .map(|binding| self.state[binding.species].max(0.0)),
        }
    }
}

#[inline]
fn power(concentration: f64, order: f64) -> f64 {
    if order == 1.0 {
        concentration
    } else if order.fract() == 0.0 && order <= 8.0 {
        concentration.powi(order as i32)
    } else {
        concentration.powf(order)
    }
}

#[inline]
fn mass_action_term(rate_constant: f64, participants: &[Reactant], state: &[f64]) -> f64 {
    let mut term = rate_constant;
    for participant in participants {
        term *= power(state[participant.species].max(0.0), participant.order);
    }
    term
}

impl Reaction {
    /// Reaction rate (flux) at concentrations `state` and time `t`.
    #[inline]
    pub fn rate(&self, t: f64, state: &[f64]) -> f64 {
        let rate_constant = self.rate_constant;
        match self.law {
            RateLaw::MassAction => mass_action_term(rate_constant, &self.reactants, state),
            RateLaw::ReversibleMassAction { k_rev } => {
                mass_action_term(rate_constant, &self.reactants, state)
                    - mass_action_term(k_rev, &self.products, state)
            }
            RateLaw::Hill {
                activator,
                hill_n,
                k_half_pow_n,
                ..
            } => {
                let power = state[activator].max(0.0).powf(hill_n);
                rate_constant * power / (k_half_pow_n + power)
            }
            RateLaw::MichaelisMenten { substrate, k_m } => {
                let concentration = state[substrate].max(0.0);
                rate_constant * concentration / (k_m + concentration)
            }
            RateLaw::Expression {
                ref expr,
                ref bindings,
            } => {
                let ctx = (
                    ExpressionContext {
                        bindings,
                        state,
                        rate_constant,
                        t,
                    },
                    Context::new(),
                );
                expr.eval_with_context(ctx).unwrap_or(0.0)
            }
        }
    }

    fn from_deltas(
        id: String,
        rate_constant: f64,
        deltas: Vec<SpeciesDelta>,
        law: RateLaw,
    ) -> Self {
        let reactants = deltas
            .iter()
            .filter_map(|d| {
                (d.delta < 0.0).then_some(Reactant {
                    species: d.species,
                    order: -d.delta,
                })
            })
            .collect();
        let products = deltas
            .iter()
            .filter_map(|d| {
                (d.delta > 0.0).then_some(Reactant {
                    species: d.species,
                    order: d.delta,
                })
            })
            .collect();
        Self {
            id,
            rate_constant,
            reactants,
            products,
            deltas,
            law,
        }
    }
}

fn parse_species_variable(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('s').or_else(|| name.strip_prefix('S'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<usize>().ok()
}

/// Scan identifiers in `expr_str` and resolve those naming species, either by
/// id or positionally as `s<idx>`. Other identifiers are left for `meval`.
pub(crate) fn collect_bindings(
    expr_str: &str,
    reaction_idx: usize,
    species_index: &HashMap<&str, usize>,
    n_species: usize,
) -> Result<Vec<Binding>, SimError> {
    let mut bindings: Vec<Binding> = Vec::new();
    let bytes = expr_str.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        let ch = bytes[idx];
        if ch.is_ascii_digit() || ch == b'.' {
            // Numeric literal, including an exponent such as 1e-5.
            idx += 1;
            while idx < bytes.len() && (bytes[idx].is_ascii_digit() || bytes[idx] == b'.') {
                idx += 1;
            }
            if idx < bytes.len() && (bytes[idx] == b'e' || bytes[idx] == b'E') {
                let mut end = idx + 1;
                if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
                    end += 1;
                }
                if end < bytes.len() && bytes[end].is_ascii_digit() {
                    idx = end;
                    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                        idx += 1;
                    }
                }
            }
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            let start = idx;
            while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
                idx += 1;
            }
            let name = &expr_str[start..idx];
            if bindings.iter().any(|b| b.name == name) {
                continue;
            }
            let species = match species_index.get(name) {
                Some(&species) => Some(species),
                None => match parse_species_variable(name) {
                    Some(species) if species >= n_species => {
                        return Err(SimError::InvalidArgument(format!(
                            "reaction {} expression species index {} exceeds number of species {}",
                            reaction_idx, species, n_species
                        )));
                    }
                    other => other,
                },
            };
            if let Some(species) = species {
                bindings.push(Binding {
                    name: name.to_string(),
                    species,
                });
            }
            continue;
        }
        idx += 1;
    }
    Ok(bindings)
}

fn compile_expression(
    expr_str: &str,
    reaction_idx: usize,
    species_index: &HashMap<&str, usize>,
    n_species: usize,
) -> Result<RateLaw, SimError> {
    let expr = Expr::from_str(expr_str).map_err(|err| {
        SimError::InvalidArgument(format!(
            "reaction {} expression parse error: {}",
            reaction_idx, err
        ))
    })?;
    let bindings = collect_bindings(expr_str, reaction_idx, species_index, n_species)?;
    // Unknown variables and functions only surface on evaluation.
    let sample_state = vec![1.0; n_species];
    let ctx = (
        ExpressionContext {
            bindings: &bindings,
            state: &sample_state,
            rate_constant: 1.0,
            t: 0.0,
        },
        Context::new(),
    );
    expr.eval_with_context(ctx).map_err(|err| {
        SimError::InvalidArgument(format!(
            "reaction {} expression cannot be evaluated: {}",
            reaction_idx, err
        ))
    })?;
    Ok(RateLaw::Expression { expr, bindings })
}

fn hill_law(
    reaction_idx: usize,
    activator: usize,
    hill_n: f64,
    k_half: f64,
    n_species: usize,
) -> Result<RateLaw, SimError> {
    if !(hill_n > 0.0) || !(k_half > 0.0) {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} Hill parameters must be positive",
            reaction_idx
        )));
    }
    if activator >= n_species {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} activator index {} exceeds number of species {}",
            reaction_idx, activator, n_species
        )));
    }
    let k_half_pow_n = k_half.powf(hill_n);
    if !(k_half_pow_n > 0.0) || !k_half_pow_n.is_finite() {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} Hill k_half^n = {} is not a positive finite number",
            reaction_idx, k_half_pow_n
        )));
    }
    Ok(RateLaw::Hill {
        activator,
        hill_n,
        k_half,
        k_half_pow_n,
    })
}

fn michaelis_menten_law(
    reaction_idx: usize,
    substrate: usize,
    k_m: f64,
    n_species: usize,
) -> Result<RateLaw, SimError> {
    if !(k_m > 0.0) {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} Michaelis-Menten k_m must be positive",
            reaction_idx
        )));
    }
    if substrate >= n_species {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} substrate index {} exceeds number of species {}",
            reaction_idx, substrate, n_species
        )));
    }
    Ok(RateLaw::MichaelisMenten { substrate, k_m })
}

fn reversible_law(reaction_idx: usize, k_rev: f64) -> Result<RateLaw, SimError> {
    if !k_rev.is_finite() || k_rev < 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} reverse rate constant must be finite and non-negative",
            reaction_idx
        )));
    }
    Ok(RateLaw::ReversibleMassAction { k_rev })
}

fn index_param(value: f64, reaction_idx: usize, what: &str) -> Result<usize, SimError> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} {} index must be a non-negative integer",
            reaction_idx, what
        )));
    }
    Ok(value as usize)
}

fn require_params<'a>(
    params: Option<&'a [f64]>,
    count: usize,
    reaction_idx: usize,
    layout: &str,
) -> Result<&'a [f64], SimError> {
    let params = params.ok_or_else(|| {
        SimError::InvalidArgument(format!(
            "reaction {} requires parameters {}",
            reaction_idx, layout
        ))
    })?;
    if params.len() < count {
        return Err(SimError::InvalidArgument(format!(
            "reaction {} parameters require {}",
            reaction_idx, layout
        )));
    }
    Ok(params)
}

impl RateLaw {
    fn from_code(
        code: ReactionTypeCode,
        reaction_idx: usize,
        species_index: &HashMap<&str, usize>,
        n_species: usize,
        params: Option<&[f64]>,
        expression: Option<&str>,
    ) -> Result<Self, SimError> {
        let require = |count: usize, layout: &'static str| {
            require_params(params, count, reaction_idx, layout)
        };
        match code {
            ReactionTypeCode::MassAction => Ok(Self::MassAction),
            ReactionTypeCode::ReversibleMassAction => {
                let params = require(1, "[k_rev]")?;
                reversible_law(reaction_idx, params[0])
            }
            ReactionTypeCode::Hill => {
                let params = require(3, "[activator, hill_n, K]")?;
                let activator = index_param(params[0], reaction_idx, "activator")?;
                hill_law(reaction_idx, activator, params[1], params[2], n_species)
            }
            ReactionTypeCode::MichaelisMenten => {
                let params = require(2, "[substrate_index, k_m]")?;
                let substrate = index_param(params[0], reaction_idx, "substrate")?;
                michaelis_menten_law(reaction_idx, substrate, params[1], n_species)
            }
            ReactionTypeCode::Expression => {
                let expr_str = expression.ok_or_else(|| {
                    SimError::InvalidArgument(format!(
                        "reaction {} requires an expression string",
                        reaction_idx
                    ))
                })?;
                compile_expression(expr_str, reaction_idx, species_index, n_species)
            }
        }
    }
}

/// Dense-array description of a network, row-major stoichiometry with one row
/// per reaction and one column per species.
#[derive(Clone, Debug, Default)]
pub struct ArrayInputs<'a> {
    pub stoich: &'a [f64],
    pub n_species: usize,
    pub initial: &'a [f64],
    pub rate_constants: &'a [f64],
    pub reaction_type_codes: &'a [i32],
    pub reaction_type_params: Option<Vec<Vec<f64>>>,
    pub reaction_expressions: Option<Vec<Option<String>>>,
    pub fixed_species: Option<&'a [bool]>,
    pub species_ids: Option<Vec<String>>,
    pub reaction_ids: Option<Vec<String>>,
}

fn check_len<T>(values: &[T], expected: usize, name: &str, of: &str) -> Result<(), SimError> {
    if values.len() != expected {
        return Err(SimError::Shape(format!(
            "{name} length {} does not match {of} count {}",
            values.len(),
            expected
        )));
    }
    Ok(())
}

pub(crate) fn build_reaction_deltas(n_species: usize, stoich: &[f64]) -> Vec<Vec<SpeciesDelta>> {
    stoich
        .chunks_exact(n_species)
        .map(|row| {
            row.iter()
                .enumerate()
                .filter_map(|(species, &delta)| {
                    (delta != 0.0).then_some(SpeciesDelta { species, delta })
                })
                .collect()
        })
        .collect()
}

/// JSON description of a network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub species: Vec<SpeciesDefinition>,
    pub reactions: Vec<ReactionDefinition>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDefinition {
    pub id: String,
    pub initial: f64,
    #[serde(default)]
    pub fixed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReactionDefinition {
    pub id: String,
    /// Species id to stoichiometric coefficient; negative entries are consumed.
    pub stoichiometry: BTreeMap<String, f64>,
    pub rate_law: RateLawDefinition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLawDefinition {
    MassAction {
        k: f64,
    },
    ReversibleMassAction {
        k: f64,
        k_rev: f64,
    },
    Hill {
        k: f64,
        activator: String,
        n: f64,
        k_half: f64,
    },
    MichaelisMenten {
        k: f64,
        substrate: String,
        k_m: f64,
    },
    Expression {
        expr: String,
        #[serde(default)]
        k: f64,
    },
}

impl RateLawDefinition {
    fn rate_constant(&self) -> f64 {
        match *self {
            Self::MassAction { k }
            | Self::ReversibleMassAction { k, .. }
            | Self::Hill { k, .. }
            | Self::MichaelisMenten { k, .. }
            | Self::Expression { k, .. } => k,
        }
    }
}

impl ModelDefinition {
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, Debug)]
pub struct ReactionNetwork {
    species: Vec<Species>,
    reactions: Vec<Reaction>,
}

fn index_ids<'a>(
    ids: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<HashMap<&'a str, usize>, SimError> {
    let mut index = HashMap::new();
    for (idx, id) in ids.enumerate() {
        if id.is_empty() {
            return Err(SimError::InvalidArgument(format!("{what} {idx} has an empty id")));
        }
        if index.insert(id, idx).is_some() {
            return Err(SimError::InvalidArgument(format!("duplicate {what} id '{id}'")));
        }
    }
    Ok(index)
}

impl ReactionNetwork {
    pub fn from_arrays(inputs: ArrayInputs<'_>) -> Result<Self, SimError> {
        let n_species = inputs.n_species;
        if n_species == 0 || inputs.stoich.is_empty() {
            return Err(SimError::InvalidArgument(
                "stoichiometry must contain at least one reaction and one species".into(),
            ));
        }
        if inputs.stoich.len() % n_species != 0 {
            return Err(SimError::Shape(format!(
                "stoichiometry length {} is not a multiple of species count {}",
                inputs.stoich.len(),
                n_species
            )));
        }
        let n_reactions = inputs.stoich.len() / n_species;
        check_len(inputs.initial, n_species, "initial concentration", "species")?;
        check_len(inputs.rate_constants, n_reactions, "rate constant", "reaction")?;
        check_len(inputs.reaction_type_codes, n_reactions, "reaction type", "reaction")?;
        if let Some(rows) = &inputs.reaction_type_params {
            check_len(rows, n_reactions, "reaction parameter rows", "reaction")?;
        }
        if let Some(exprs) = &inputs.reaction_expressions {
            check_len(exprs, n_reactions, "reaction_expressions", "reaction")?;
        }
        if let Some(fixed) = inputs.fixed_species {
            check_len(fixed, n_species, "fixed species", "species")?;
        }

        let species_ids = match inputs.species_ids {
            Some(ids) => {
                check_len(&ids, n_species, "species ids", "species")?;
                ids
            }
            None => (0..n_species).map(|idx| format!("s{idx}")).collect(),
        };
        let reaction_ids = match inputs.reaction_ids {
            Some(ids) => {
                check_len(&ids, n_reactions, "reaction ids", "reaction")?;
                ids
            }
            None => (0..n_reactions).map(|idx| format!("r{idx}")).collect(),
        };

        let species: Vec<Species> = species_ids
            .into_iter()
            .enumerate()
            .map(|(idx, id)| Species {
                id,
                initial: inputs.initial[idx],
                fixed: inputs.fixed_species.is_some_and(|fixed| fixed[idx]),
            })
            .collect();
        let species_index = index_ids(species.iter().map(|s| s.id.as_str()), "species")?;

        let mut reactions = Vec::with_capacity(n_reactions);
        let deltas = build_reaction_deltas(n_species, inputs.stoich);
        for (idx, (deltas, id)) in deltas.into_iter().zip(reaction_ids).enumerate() {
            let params = inputs
                .reaction_type_params
                .as_ref()
                .and_then(|rows| rows.get(idx))
                .map(Vec::as_slice);
            let expression = inputs
                .reaction_expressions
                .as_ref()
                .and_then(|list| list.get(idx))
                .and_then(Option::as_deref);
            let code = ReactionTypeCode::try_from(inputs.reaction_type_codes[idx])?;
            if code != ReactionTypeCode::Expression && expression.is_some() {
                return Err(SimError::InvalidArgument(format!(
                    "reaction {} provided an expression but is not marked as an expression \
                     rate law",
                    idx
                )));
            }
            let law =
                RateLaw::from_code(code, idx, &species_index, n_species, params, expression)?;
            reactions.push(Reaction::from_deltas(
                id,
                inputs.rate_constants[idx],
                deltas,
                law,
            ));
        }
        Self::assemble(species, reactions)
    }

    pub fn from_definition(definition: &ModelDefinition) -> Result<Self, SimError> {
        let species: Vec<Species> = definition
            .species
            .iter()
            .map(|s| Species {
                id: s.id.clone(),
                initial: s.initial,
                fixed: s.fixed,
            })
            .collect();
        let n_species = species.len();
        let species_index = index_ids(species.iter().map(|s| s.id.as_str()), "species")?;
        let lookup = |reaction_idx: usize, id: &str| -> Result<usize, SimError> {
            species_index.get(id).copied().ok_or_else(|| {
                SimError::InvalidArgument(format!(
                    "reaction {} refers to unknown species '{}'",
                    reaction_idx, id
                ))
            })
        };

        let mut reactions = Vec::with_capacity(definition.reactions.len());
        for (idx, reaction) in definition.reactions.iter().enumerate() {
            let mut deltas = Vec::with_capacity(reaction.stoichiometry.len());
            for (species_id, &delta) in &reaction.stoichiometry {
                let species = lookup(idx, species_id)?;
                if delta != 0.0 {
                    deltas.push(SpeciesDelta { species, delta });
                }
            }
            deltas.sort_by_key(|d| d.species);
            let law = match &reaction.rate_law {
                RateLawDefinition::MassAction { .. } => RateLaw::MassAction,
                RateLawDefinition::ReversibleMassAction { k_rev, .. } => {
                    reversible_law(idx, *k_rev)?
                }
                RateLawDefinition::Hill {
                    activator,
                    n,
                    k_half,
                    ..
                } => hill_law(idx, lookup(idx, activator)?, *n, *k_half, n_species)?,
                RateLawDefinition::MichaelisMenten { substrate, k_m, .. } => {
                    michaelis_menten_law(idx, lookup(idx, substrate)?, *k_m, n_species)?
                }
                RateLawDefinition::Expression { expr, .. } => {
                    compile_expression(expr, idx, &species_index, n_species)?
                }
            };
            reactions.push(Reaction::from_deltas(
                reaction.id.clone(),
                reaction.rate_law.rate_constant(),
                deltas,
                law,
            ));
        }
        Self::assemble(species, reactions)
    }

    pub fn from_json(text: &str) -> Result<Self, SimError> {
        Self::from_definition(&ModelDefinition::from_json(text)?)
    }

    fn assemble(species: Vec<Species>, reactions: Vec<Reaction>) -> Result<Self, SimError> {
        if species.is_empty() || reactions.is_empty() {
            return Err(SimError::InvalidArgument(
                "model must contain at least one species and one reaction".into(),
            ));
        }
        let reserved: HashSet<&str> = RESERVED_NAMES.into_iter().collect();
        for s in &species {
            if reserved.contains(s.id.as_str()) {
                return Err(SimError::InvalidArgument(format!(
                    "species id '{}' is reserved in rate expressions",
                    s.id
                )));
            }
            if !s.initial.is_finite() || s.initial < 0.0 {
                return Err(SimError::InvalidArgument(format!(
                    "species '{}' initial concentration must be finite and non-negative",
                    s.id
                )));
            }
        }
        index_ids(reactions.iter().map(|r| r.id.as_str()), "reaction")?;
        for r in &reactions {
            if !r.rate_constant.is_finite() {
                return Err(SimError::InvalidArgument(format!(
                    "reaction '{}' rate constant must be finite",
                    r.id
                )));
            }
        }
        debug!(
            n_species = species.len(),
            n_reactions = reactions.len(),
            n_fixed = species.iter().filter(|s| s.fixed).count(),
            "assembled reaction network"
        );
        Ok(Self { species, reactions })
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn n_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn initial_values(&self) -> Vec<f64> {
        self.species.iter().map(|s| s.initial).collect()
    }

    pub fn species_ids(&self) -> Vec<String> {
        self.species.iter().map(|s| s.id.clone()).collect()
    }

    pub fn reaction_ids(&self) -> Vec<String> {
        self.reactions.iter().map(|r| r.id.clone()).collect()
    }

    pub fn species_index(&self, id: &str) -> Option<usize> {
        self.species.iter().position(|s| s.id == id)
    }
}
