// ABOUTME: Defense-in-depth validation for sandbox file paths and commands
// ABOUTME: Checks inputs before remote dispatch; isolation itself is the provider's job

pub mod command;
pub mod path;

pub use command::validate_command;
pub use path::sanitize_file_path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Command blocked by security policy: matched pattern '{0}'")]
    BlockedCommand(String),

    #[error("Empty command")]
    EmptyCommand,
}
