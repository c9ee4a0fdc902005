//! CLI command handlers, one file per command.

mod config_path;
mod history;
mod serve;

pub use config_path::run_config_path;
pub use history::run_history;
pub use serve::run_serve;
