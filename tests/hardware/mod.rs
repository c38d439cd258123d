//! Tests against a real serial device named by `TEST_PORT`.

pub mod listener_tests;
pub mod utils;
