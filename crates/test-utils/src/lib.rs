// crates/test-utils/src/lib.rs

pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};
use vectorfarm::logging::LOG_ENV;

/// Filter used when `VECTORFARM_LOG` is unset: the scheduler, runtime and
/// coordinator at debug, everything else (tokio, dependencies) at warn.
pub const DEFAULT_TEST_FILTER: &str = "warn,vectorfarm=debug,vectorfarm_test_utils=debug";

/// Upper bound for one runtime or protocol exchange in tests. Worker status
/// ticks in tests are milliseconds apart, so this only trips on a hang.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Initialise tracing for tests, once per test binary.
///
/// Logs go through `with_test_writer()`, so they only show for failing
/// tests unless run with `--nocapture`. Override the filter with e.g.
/// `VECTORFARM_LOG=vectorfarm::exec=trace cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));

        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, failing the test after [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    with_timeout_of(TEST_TIMEOUT, f).await
}

/// Await `f`, failing the test after `limit`.
pub async fn with_timeout_of<F, T>(limit: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, f).await {
        Ok(value) => value,
        Err(_) => panic!("test timed out after {limit:?}; a job, plan or worker exchange never finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_values_through() {
        assert_eq!(with_timeout(async { 7 }).await, 7);
    }

    #[tokio::test]
    #[should_panic(expected = "test timed out after")]
    async fn with_timeout_of_fails_a_hung_future() {
        with_timeout_of(Duration::from_millis(10), std::future::pending::<()>()).await;
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_TEST_FILTER).is_ok());
    }
}
