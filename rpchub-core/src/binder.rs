//! Typed argument resolution for the JSON hub codec.
//!
//! JSON invocation arguments arrive as a bare `Vec<serde_json::Value>`;
//! without knowing the target method's parameter types up front there's
//! no way to deserialize each element into anything but `Value`. An
//! `InvocationBinder` is the caller-supplied lookup that closes this gap
//! without reflection: given a target name, it reports how many typed
//! slots the codec should expect.

/// Maps a hub target name to the shape its arguments should take.
///
/// Implementations typically wrap a static registry built when hub
/// methods are registered. The codec only needs the argument *count* to
/// decide how many elements to pull out of the incoming array; callers
/// that need concrete Rust types deserialize each `Value` themselves
/// once `bind` has told them how many there are.
pub trait InvocationBinder: Send + Sync {
    /// Number of expected arguments for `target`, or `None` if `target`
    /// is not registered.
    fn argument_count(&self, target: &str) -> Option<usize>;
}

/// An `InvocationBinder` that accepts any target and any argument count.
///
/// Useful for clients that don't register a static method table and
/// simply want `Value`s back, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveBinder;

impl InvocationBinder for PermissiveBinder {
    fn argument_count(&self, _target: &str) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_binder_accepts_any_target() {
        let binder = PermissiveBinder;
        assert_eq!(binder.argument_count("Send"), None);
        assert_eq!(binder.argument_count("AnythingAtAll"), None);
    }
}
