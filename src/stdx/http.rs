use reqwest::{RequestBuilder, Response};
use std::time::Duration;

pub static DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// How many retried attempts a throttled or failing request gets before the
/// final one is returned as-is. Webtoon platforms throttle aggressively, so
/// the backoff grows with every attempt.
const RETRIES: u32 = 10;

/// Sends `request`, retrying on 429 responses and transport errors with a
/// growing jittered backoff. Any other outcome is returned immediately.
pub async fn send_with_retry(request: RequestBuilder) -> Result<Response, reqwest::Error> {
    let mut wait = fastrand::u64(1..=5);

    for _ in 0..RETRIES {
        let result = clone_request(&request).send().await;

        let throttled_or_failed = match &result {
            Ok(response) => response.status() == 429,
            Err(_) => true,
        };
        if !throttled_or_failed {
            return result;
        }

        tokio::time::sleep(Duration::from_secs(wait)).await;
        wait += 3 + fastrand::u64(1..=5);
    }

    request.send().await
}

fn clone_request(request: &RequestBuilder) -> RequestBuilder {
    #[allow(clippy::expect_used, reason = "cloning only fails for streaming bodies, and every request here is a plain GET")]
    request
        .try_clone()
        .expect("`RequestBuilder` should only fail to clone when working with streams/readers, and we only do standard requests")
}
