pub mod collector_mock;

pub use collector_mock::{setup_collector_mock, setup_flaky_collector_mock};
