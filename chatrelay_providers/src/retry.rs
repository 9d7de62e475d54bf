use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Run `operation`, retrying after each of `delays` while it keeps failing.
///
/// The operation runs `delays.len() + 1` times at most; the last error is
/// returned when every attempt fails.
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, delays: &[Duration]) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = delays.len() + 1;
    for (i, delay) in delays.iter().enumerate() {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    "Request failed (attempt {}/{attempts}): {e}. Retrying after {}ms...",
                    i + 1,
                    delay.as_millis()
                );
                sleep(*delay).await;
            }
        }
    }
    operation().await
}
