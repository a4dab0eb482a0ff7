//! Profiling support via Tracy.
//!
//! Enable with the `profiling` feature:
//!
//! ```bash
//! cargo run --example clear_window --features profiling
//! ```
//!
//! Without the feature every macro expands to nothing, so call sites can stay in
//! hot paths unconditionally.
//!
//! ```ignore
//! fn upload_meshes() {
//!     profile_function!();
//!     {
//!         profile_scope!("copy_vertices");
//!         // ...
//!     }
//! }
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{Client, Span, frame_mark as tracy_frame_mark, span};

/// Start the Tracy client. Does nothing when profiling is disabled.
pub fn start() {
    #[cfg(feature = "profiling")]
    {
        let _ = tracy_client::Client::start();
    }
}

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

/// Create a profiling span for the current scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Create a profiling span covering the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Create a profiling span for function (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}
