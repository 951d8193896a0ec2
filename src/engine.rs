//! Matching engine.
//!
//! The engine is the stateless middle of the crate: it turns rule texts into
//! predicates and runs a keyword batch through them. Everything that knows
//! about levels, buckets or storage lives in [`crate::pipeline`].
//!
//! ## How the parts work together
//!
//! ```text
//! rule texts ──┐
//!              │  CompiledRules::new          (compiled_rules.rs)
//!              │    - expr::compile per text
//!              │    - syntax errors -> sink, rule skipped
//!              └──────────────┬───────────────
//!                             │
//! keywords ───────────────────┼─ CompiledRules::classify  (classify.rs)
//!                             │    - fold case once per keyword
//!                             │    - first predicate that holds wins
//!                             v
//!                     Vec<KeywordMatch>
//! ```
//!
//! Compilation is done once per scope and the compiled set is immutable, so
//! one `CompiledRules` can be shared read-only across threads.
//!
//! ## Responsibilities by module
//!
//! - `compiled_rules.rs`: compiles a rule list.
//! - `classify.rs`: the first-match-wins pass.
//! - `metrics.rs`: per-stage and per-run counters and timings.

#[path = "engine/classify.rs"]
mod classify;
#[path = "engine/compiled_rules.rs"]
mod compiled_rules;
#[path = "engine/metrics.rs"]
mod metrics;

pub use classify::KeywordMatch;
pub use compiled_rules::{CompiledRule, CompiledRules};
pub use metrics::{RunMetrics, StageMetrics};
