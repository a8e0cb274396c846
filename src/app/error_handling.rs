//! Error handling utilities

use crate::error::StateError;
use tracing::error;

/// Exit status for a failed command.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StateError>() {
        Some(StateError::Configuration { .. }) => 2,
        Some(StateError::Reference { .. }) => 3,
        Some(StateError::ShapeMismatch { .. }) => 4,
        Some(StateError::Order { .. }) => 5,
        Some(StateError::Structure { .. }) => 6,
        Some(StateError::Input { .. }) => 7,
        None => 1,
    }
}

/// Handle fatal errors and exit with appropriate status code
///
/// `StateError`s print their user message; with `-v` the full error chain
/// follows.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    match error.downcast_ref::<StateError>() {
        Some(state_err) => eprintln!("Error: {}", state_err.user_message()),
        None => eprintln!("Error: {error}"),
    }
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}
