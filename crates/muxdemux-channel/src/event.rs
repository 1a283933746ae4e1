//! Event names with built-in meaning.
//!
//! Every other event name is application-defined and carried as-is.

/// Raised when a channel fails. Nobody observing it is a fatal condition.
pub const ERROR: &str = "error";

/// Emitted on a destination when a source starts piping into it.
pub const PIPE: &str = "pipe";

/// Emitted on a destination when a source stops piping into it.
pub const UNPIPE: &str = "unpipe";

/// Plumbing events that only concern the local end of a pipe.
pub const LOCAL_ONLY: &[&str] = &[PIPE, UNPIPE];

/// Returns true if the event is local plumbing that must not cross a wire.
pub fn is_local_only(event: &str) -> bool {
    LOCAL_ONLY.contains(&event)
}

/// Returns true if the event is the error event.
pub fn is_error(event: &str) -> bool {
    event == ERROR
}
