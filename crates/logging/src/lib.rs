//! Helpers for logging from tests and benchmarks.
//!
//! The archivist crate only logs through the `log` facade; binaries choose their own logger.

/// Log to stderr, filtered by `RUST_LOG` (defaulting to warnings).
///
/// If called multiple times in the same process, only applies once.  Uses `try_init` so that it is safe to call from
/// tests, where another test harness may already have installed a logger.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format(|buf, record| {
                use std::io::Write;

                let now = time::OffsetDateTime::now_utc();

                writeln!(
                    buf,
                    "{} {} time={} target={}",
                    record.level(),
                    record.args(),
                    now,
                    record.target()
                )
            })
            .is_test(true)
            .try_init();
        log::debug!("Logging to stderr");
    });
}
