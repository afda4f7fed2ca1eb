//! Log helpers layered over `tracing`.
//!
//! Components never install a subscriber themselves; the binary does that once at
//! startup. The only addition here is a dedicated target for "success" events,
//! which the terminal formatter renders with its own marker.

/// Target used by [`success!`](crate::success) events.
pub const SUCCESS_TARGET: &str = "vortex::success";

/// Emits an `INFO` event tagged as a success.
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        $crate::info!(target: $crate::log::SUCCESS_TARGET, $($arg)+)
    };
}
