//! Command-line surface.

pub mod backend;
pub mod commands;
pub mod error;
pub mod handlers;

pub use commands::build_cli;
pub use error::{format_error, get_exit_code};
pub use handlers::run_cli;
