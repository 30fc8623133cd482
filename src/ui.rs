//! Terminal output helpers.
//!
//! Semantic wrappers over ad-hoc println! calls so messages stay consistent:
//! green ✓ for success, red ✗ for failure, yellow ! for warnings, blue → for
//! progress. Debug chatter is gated on --verbose and goes to stderr.

use colored::Colorize;

use crate::context::ExecutionContext;

/// Success marker: ✓
pub const MARK_SUCCESS: &str = "✓";
/// Error/failure marker: ✗
pub const MARK_ERROR: &str = "✗";
/// Warning marker: !
pub const MARK_WARNING: &str = "!";
/// Progress/step marker: →
pub const MARK_STEP: &str = "→";

/// Print success message: "✓ {message}" in green
pub fn success(message: &str) {
    println!("{} {}", MARK_SUCCESS.green(), message);
}

/// Print bold success message
pub fn success_bold(message: &str) {
    println!("{} {}", MARK_SUCCESS.green().bold(), message.green().bold());
}

/// Print error message to stderr: "✗ {message}" in red
pub fn error(message: &str) {
    eprintln!("{} {}", MARK_ERROR.red(), message);
}

/// Print warning message: "! {message}" in yellow
pub fn warning(message: &str) {
    eprintln!("{} {}", MARK_WARNING.yellow().bold(), message);
}

/// Print step/progress message: "→ {message}" in blue
pub fn step(message: &str) {
    println!("{} {}", MARK_STEP.blue(), message);
}

/// Print status line without a marker (peer comparison, plain notes).
pub fn status(message: &str) {
    println!("{}", message);
}

/// Debug line, shown only with --verbose. Goes to stderr so it never mixes
/// with parseable output.
pub fn debug(message: &str) {
    if ExecutionContext::is_verbose() {
        eprintln!("{}", message.bright_black());
    }
}
