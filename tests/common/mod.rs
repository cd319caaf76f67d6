//! Shared test infrastructure for viewser integration tests.
//!
//! - `TestHarness`: temp directory plus a log that is dumped when a test fails
//! - `MockHttpServer`: offline, scripted stand-in for the queryset service
//! - `fixtures`: long-format frames for the drift scenarios

pub mod fixtures;
pub mod harness;

#[allow(unused_imports)]
pub use harness::{MockHttpRequest, MockHttpResponse, MockHttpServer, TestHarness};
