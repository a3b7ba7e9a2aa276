mod parser;
mod registry;

pub use parser::{parse_command, Intent};
pub use registry::HELP_COMMANDS;
