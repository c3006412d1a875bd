pub mod khstate;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "khstate_test.rs"]
mod khstate_tests;
