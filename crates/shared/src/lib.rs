pub mod catalog;
pub mod domain;
pub mod error;
pub mod execution;
pub mod filters;
pub mod protocol;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
