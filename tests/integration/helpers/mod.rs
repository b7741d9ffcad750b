pub mod test_config;

pub use test_config::{batch_contents, create_test_config, wait_until};
