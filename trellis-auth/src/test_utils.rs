// SPDX-License-Identifier: MIT OR Apache-2.0

/// Install a log subscriber when `RUST_LOG` is set, useful when debugging a failing test.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}
