//! Shared setup for integration tests.
//!
//! `RUST_LOG` selects what is printed, e.g. `RUST_LOG=critbit=trace`.
//! Output goes through the test harness capture, so it only shows for failing
//! tests or with `--nocapture`.

#![allow(dead_code)]

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", Level::WARN)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
