//! Command implementations for the keg CLI
//!
//! - **install**: plan and build a formula with its dependencies
//! - **test**: run the test commands of an installed formula
//! - **deps**: show the resolved dependency closure
//! - **options**: list the options a formula accepts
//! - **info**: formula summary and install state
//! - **postinstall**: re-run post-install hooks
//! - **utils**: shared rendering helpers

pub mod deps;
pub mod info;
pub mod install;
pub mod options;
pub mod postinstall;
pub mod test;
pub mod utils;

pub use deps::deps;
pub use info::info;
pub use install::{InstallArgs, install};
pub use options::options;
pub use postinstall::postinstall;
pub use test::test;
