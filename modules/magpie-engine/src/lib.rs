pub mod coordinator;
pub mod embedder;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod gate;
pub mod identity;
pub mod politeness;
pub mod profiles;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
