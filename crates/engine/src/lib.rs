//! Feed derivation engine
//!
//! Features:
//! - Target price algorithms, including a stateful PID controller
//! - Persisted per-asset controller state
//! - Change policy flags and publish planning
//! - Full derivation cycle over a fetched source snapshot

pub mod chain;
pub mod controller;
pub mod deriver;
pub mod evaluator;
pub mod publish;
pub mod target;

pub use chain::{ChainView, StaticChain};
pub use controller::{ControllerStore, JsonControllerStore, MemoryControllerStore};
pub use deriver::{DerivationReport, FeedDeriver};
pub use evaluator::{evaluate, Evaluation, EvaluationInput};
pub use publish::{plan, PublishOptions, PublishVerdict};
pub use target::{TargetPriceEngine, TargetPriceInput, TargetPriceOutcome};
