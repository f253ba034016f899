//! Shared tracing setup for the portwatch binaries and tests.

mod subscriber;

pub use subscriber::{init as init_tracing, try_init as try_init_tracing};
