//! Integration tests

pub mod mutation_test;
pub mod odata_test;
pub mod session_test;
