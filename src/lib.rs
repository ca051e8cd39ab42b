//! Library interface for kegworks (keg), a formula execution engine
//!
//! A formula is a JSON document describing how to build one package from
//! source. The pieces compose in order:
//!
//! 1. [`options::resolve`] turns command-line flags into [`BuildOptions`].
//! 2. [`PlanBuilder`] computes the dependency closure as an [`InstallPlan`].
//! 3. [`Engine::install`] stages, builds and links every formula in the plan,
//!    running the [`executor`] and [`postinstall`] steps for each.

pub mod cellar;
pub mod colors;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod formula;
pub mod locks;
pub mod options;
pub mod patch;
pub mod platform;
pub mod postinstall;
pub mod predicate;
pub mod progress;
pub mod receipt;
pub mod registry;
pub mod resolve;
pub mod stage;
pub mod symlink;

// Re-export commonly used items
pub use config::Settings;
pub use engine::{CancelToken, Engine, Outcome, PlanObserver, PlanReport};
pub use error::{KegError, Result};
pub use formula::Formula;
pub use options::BuildOptions;
pub use platform::Platform;
pub use registry::Registry;
pub use resolve::{InstallPlan, PlanBuilder};
pub use symlink::normalize_path;
