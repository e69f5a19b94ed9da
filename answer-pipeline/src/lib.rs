pub mod chain;
pub mod pipeline;
pub mod session;
pub mod sources;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
