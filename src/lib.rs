//! # dedup-engine: duplication detection and safe refactoring
//!
//! A library that finds duplicated and near-duplicated functions across a
//! multi-language project tree, ranks them by how safe and valuable they
//! are to merge, generates an extraction plan, and applies it transactionally
//! with automatic backup and rollback.
//!
//! All structural matching and parsing is delegated to an external AST
//! pattern-matching executable (see [`adapter`]); this crate never embeds a
//! parser of its own.
//!
//! ## Pipeline
//!
//! ```text
//! walker ─┬─> detector ─> analyzer ─┬─> generator ─┐
//!  (C2)   │     (C4)        (C5)    │     (C6)     │
//!         │                         └─> ranker      ├─> applicator ─> backup
//! adapter ┘                             (C7)        │      (C9)       (C10)
//!  (C1)                                 coverage ───┘
//! cache (C3)                             (C8)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dedup_engine::{DedupEngine, EngineConfig, Language};
//!
//! # #[tokio::main]
//! # async fn main() -> dedup_engine::Result<()> {
//! let engine = DedupEngine::new("./my-project", EngineConfig::default())?;
//! let recommendations = engine.recommend(Language::Python).await?;
//! for candidate in &recommendations {
//!     println!("{}: composite score {:.2}", candidate.group_id, candidate.composite);
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod analyze;
pub mod apply;
pub mod backup;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod detect;
pub mod engine;
pub mod errors;
pub mod generate;
pub mod lock;
pub mod model;
pub mod rank;
pub mod walker;

pub use config::{EngineConfig, Language};
pub use engine::{init_tracing, DedupEngine};
pub use errors::{DedupError, Result};
pub use model::{CandidateScore, DuplicationGroup, ExtractedFunctionPlan, GeneratePlanOptions, RefactoringPlan};

/// Library version, exposed for diagnostics and the `ValidationOutcome`
/// metadata the applicator attaches to a run.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
