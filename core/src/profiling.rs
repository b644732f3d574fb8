//! Profiling support via Tracy.
//!
//! Instrumentation for the [Tracy profiler](https://github.com/wolfpld/tracy),
//! switched on with the `profiling` Cargo feature. Without the feature every
//! macro below expands to nothing.
//!
//! ```toml
//! [dependencies]
//! lilium-core = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lilium_core::{frame_mark, profile_scope, set_thread_name};
//!
//! std::thread::spawn(|| {
//!     set_thread_name!("command worker");
//!     loop {
//!         profile_scope!("record batch");
//!         // drain and translate commands...
//!     }
//! });
//!
//! loop {
//!     // begin frame, record, end frame...
//!     frame_mark!();
//! }
//! ```
//!
//! Recording threads and the scheduler both emit spans, so a Tracy capture
//! shows how long each lane spends translating and how long fence polling
//! takes at the start of a frame.

#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Open a named span that lasts until the end of the enclosing scope.
///
/// ```ignore
/// fn end_frame() {
///     {
///         profile_scope!("wait main fences");
///         // ...
///     }
/// }
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Open a named span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Open a span named after the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Open a function span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Plot a numeric value over time, e.g. outstanding fences per frame.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Name the current thread in Tracy. Takes a string literal.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:expr) => {
        $crate::profiling::tracy_client::set_thread_name!($name)
    };
}

/// Name the current thread (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:expr) => {};
}

/// Send a message to Tracy's message log.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_message {
    ($msg:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.message($msg, 0);
        }
    };
}

/// Send a message (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_message {
    ($msg:expr) => {};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_without_feature() {
        profile_function!();
        profile_scope!("scope");
        profile_plot!("value", 3u32);
        profile_message!("message");
        set_thread_name!("test thread");
        frame_mark!();
    }
}
