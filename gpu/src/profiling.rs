//! Profiling support via Tracy.
//!
//! With the `profiling` feature enabled, [`profile_scope!`](crate::profile_scope)
//! and [`profile_function!`](crate::profile_function) open Tracy spans that end
//! with the enclosing scope. Without it they expand to nothing.
//!
//! ```ignore
//! fn submit_frame() {
//!     profile_function!();
//!     {
//!         profile_scope!("record");
//!         // ...
//!     }
//! }
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, Span, span};

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

/// Create a profiling span for the entire function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Create a profiling span for the entire function (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Start the Tracy client. Does nothing without the `profiling` feature.
pub fn start() {
    #[cfg(feature = "profiling")]
    {
        Client::start();
        log::info!("Tracy profiling client started");
    }
}
