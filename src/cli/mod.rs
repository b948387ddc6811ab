//! ploy-scheduler CLI
//!
//! Commands:
//! - (default) / `run` - supervise one component until signaled
//! - `enable` / `disable` - flip a component's remote toggle
//! - `status` - heartbeat rows with liveness
//! - `errors` - recent error events
//! - `list` - registered catalog
//! - `migrate` - apply the coordination schema

pub mod commands;
pub mod output;
pub mod runtime;

pub use output::OutputMode;
pub use runtime::{Cli, Commands};
