// fabric-test-utils: shared test utilities for the ingestion/proxy fabric.
//
// Provides an in-process fake bus for integration testing of services that
// would otherwise need a real NATS server.

pub mod fake_bus;

pub use fake_bus::{FakeBus, FakeBusError, FakeMessage};
