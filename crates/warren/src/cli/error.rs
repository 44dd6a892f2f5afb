//! Error formatting utilities for CLI output
//!
//! A command can fail two ways: before it reaches the sync bridge (bad flags,
//! no database, invalid config), which surfaces as a `warren_core::Error`,
//! or inside the bridge, where the failure is logged and comes back as a
//! [`CommandFailed`]. Both map onto the same exit codes.

use warren_core::{sync::CommandError, ErrorKind};

/// A command that was logged but did not succeed.
#[derive(Debug, thiserror::Error)]
#[error("{} ({})", .0.message, .0.code)]
pub struct CommandFailed(pub CommandError);

/// Exit code for a caller-facing error kind.
///
/// * 1 - validation
/// * 2 - process side effect
/// * 3 - not found
/// * 4 - conflict, dependency or internal state
/// * 5 - timeout
pub const fn exit_code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::ValidationError => 1,
        ErrorKind::ProcessError => 2,
        ErrorKind::NotFoundError => 3,
        ErrorKind::ConflictError | ErrorKind::DependencyError | ErrorKind::InternalError => 4,
        ErrorKind::TimeoutError => 5,
    }
}

/// Format an error for user display (no stack traces)
#[must_use]
pub fn format_error(err: &anyhow::Error) -> String {
    let mut msg = err.to_string();
    if let Some(source) = err.source() {
        let source_msg = source.to_string();
        if !msg.contains(&source_msg) && !source_msg.is_empty() {
            msg = format!("{msg}\nCause: {source_msg}");
        }
    }
    msg
}

/// Extract appropriate exit code from an error
///
/// Falls back to 2 (system error) for errors from outside the core.
#[must_use]
pub fn get_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(failed) = err.downcast_ref::<CommandFailed>() {
        return exit_code_for(failed.0.kind);
    }
    if let Some(core_err) = err.downcast_ref::<warren_core::Error>() {
        return core_err.exit_code();
    }
    2
}
