//! Test-support crate: an in-memory `Transport` driven entirely by a test
//! script, plus the smallest fixture handlers needed to drive the seed
//! scenarios in `rws-core/tests/scenarios.rs`.

mod fake_transport;
mod fixtures;

pub use fake_transport::{FakeTransport, FakeTransportController};
pub use fixtures::{AlwaysAllowRateLimitHandler, EchoConnectionHandler, ReconnectOnAnyErrorHandler, RecordingSubscriptionHandler};
