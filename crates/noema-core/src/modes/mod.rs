//! Advanced reasoning modes beyond the orchestrator's core
//! pattern/causal/contextual/hybrid dispatch (spec.md §4.12).
//!
//! Each engine here consumes only `(hypergraph, vector index, pattern
//! store, graph store)` — never the trajectory tracker or online
//! learner — and returns the shared [`crate::orchestrator::ReasoningResponse`]
//! shape with its mode-specific result attached as `mode_payload`.

pub mod abductive;
pub mod constraint;
pub mod counterfactual;
pub mod temporal;

pub use abductive::{AbductiveConfig, AbductiveEngine, AbductiveExplanation};
pub use constraint::{Constraint, ConstraintConfig, ConstraintEngine, ConstraintSolution};
pub use counterfactual::{CounterfactualConfig, CounterfactualEngine, CounterfactualScenario, Perturbation};
pub use temporal::{ChainLink, TemporalConfig, TemporalEngine, TemporalReasoningResult};
