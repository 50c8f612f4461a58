//! CLI command implementations

mod check;
pub mod context;
mod priority;
mod run;
mod status;
pub mod style;

pub use check::run_check;
pub use priority::run_priority;
pub use run::run_service;
pub use status::run_status;
