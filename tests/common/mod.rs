//! Common test utilities for gallery-pipeline integration tests

#[allow(dead_code)]
pub mod extractor;
#[allow(dead_code)]
pub mod fixtures;

pub use extractor::*;
#[allow(unused_imports)]
pub use fixtures::*;
