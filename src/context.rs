//! Execution context for the CLI.
//!
//! Thread-local storage for the global --verbose flag, so it does not have
//! to travel through every function signature. The engine is synchronous
//! and single-threaded; a thread-local is enough.

use std::cell::RefCell;

thread_local! {
    static CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

/// Global execution context for the current invocation
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext {
    /// Show engine debug output
    pub verbose: bool,
}

impl ExecutionContext {
    /// Initialize the thread-local context
    pub fn init(verbose: bool) {
        CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = ExecutionContext { verbose };
        });
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose() -> bool {
        CONTEXT.with(|ctx| ctx.borrow().verbose)
    }
}
