//! Extension traits for best-effort operations.

/// Extension trait for Result types in best-effort operations.
///
/// Use this where failure should be logged at debug level but not
/// propagated, such as forwarding output after the IDE has gone away.
///
/// # Example
///
/// ```text
/// let url = serde_json::from_str::<Value>(line)
///     .debug_ok("Inspector line is not JSON")?;
/// ```
pub trait DebugResult<T> {
    /// Convert to Option, logging the error at debug level if Err.
    fn debug_ok(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> DebugResult<T> for Result<T, E> {
    fn debug_ok(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", context, e);
                None
            }
        }
    }
}
