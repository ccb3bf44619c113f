use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use reqwest::{Client, Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{Jitter, RetryTransientMiddleware};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use http::Extensions;
use tracing::{debug, error, warn};

/// Builds the middleware-wrapped client every outbound request goes
/// through: dual local rate limit, capped exponential-backoff retries on
/// transient status codes, request logging, and - if a token is supplied -
/// a bearer auth header plus fatal-exit detection for a reset agent token.
pub fn create_client(maybe_bearer_token: Option<String>) -> ClientWithMiddleware {
    let reqwest_client = Client::builder().build().unwrap();

    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(100), Duration::from_secs(60))
        .jitter(Jitter::Bounded)
        .base(2)
        .build_with_max_retries(6);

    let mut client_builder = ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(ErrorLoggingMiddleware)
        .with(DualRateLimitingMiddleware::new())
        .with(ThrottleShapingMiddleware);

    if let Some(token) = maybe_bearer_token {
        client_builder = client_builder.with(AuthenticatedHeaderMiddleware::new(token));
    }

    client_builder.build()
}

/// Enforces the client-side token-bucket: at most 2 requests per second
/// *and* at most 30 requests per minute, shared across the whole process.
struct DualRateLimitingMiddleware {
    per_second: Arc<DefaultDirectRateLimiter>,
    per_minute: Arc<DefaultDirectRateLimiter>,
}

impl DualRateLimitingMiddleware {
    fn new() -> Self {
        DualRateLimitingMiddleware {
            per_second: Arc::new(RateLimiter::direct(Quota::per_second(NonZeroU32::new(2).unwrap()))),
            per_minute: Arc::new(RateLimiter::direct(Quota::per_minute(NonZeroU32::new(30).unwrap()))),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for DualRateLimitingMiddleware {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        self.per_second.until_ready().await;
        self.per_minute.until_ready().await;
        next.run(req, extensions).await
    }
}

struct AuthenticatedHeaderMiddleware {
    bearer_token: String,
}

impl AuthenticatedHeaderMiddleware {
    fn new(bearer_token: String) -> Self {
        Self { bearer_token }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthenticatedHeaderMiddleware {
    async fn handle(&self, mut req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        req.headers_mut()
            .insert(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.bearer_token).parse().unwrap());

        next.run(req, extensions).await
    }
}

/// Handles the two server-signalled throttle/failure cases the retry
/// middleware's generic backoff doesn't cover on its own: a 429 carrying
/// `x-ratelimit-*` reset headers gets one extra sleep honoring that exact
/// reset time before the response is handed back for retrying, and an
/// exhausted 502 gets a short jittered sleep. The 4113 fatal-exit check
/// happens one layer up, in the client that already buffers the body.
struct ThrottleShapingMiddleware;

#[async_trait::async_trait]
impl Middleware for ThrottleShapingMiddleware {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let url = req.url().clone();
        let resp = next.run(req, extensions).await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            if let Some(reset_at) = parse_ratelimit_reset(&resp) {
                let wait = jittered_wait_until(reset_at);
                warn!(?wait, %method, %url, "429 rate limited, sleeping until reset");
                tokio::time::sleep(wait).await;
            }
        } else if resp.status() == StatusCode::BAD_GATEWAY {
            let sleep_ms = 3000 + rand::thread_rng().gen_range(-300i64..=300i64);
            debug!(sleep_ms, %method, %url, "502 with no retries left, sleeping briefly");
            tokio::time::sleep(Duration::from_millis(sleep_ms.max(0) as u64)).await;
        }

        Ok(resp)
    }
}

/// Reads the reset time from SpaceTraders' `x-ratelimit-reset` header
/// (RFC3339 timestamp) and returns the ±10% jittered wait, clamped to
/// [0, 60] seconds.
fn parse_ratelimit_reset(resp: &Response) -> Option<chrono::DateTime<chrono::Utc>> {
    let header = resp.headers().get("x-ratelimit-reset")?.to_str().ok()?;
    chrono::DateTime::parse_from_rfc3339(header).ok().map(|dt| dt.with_timezone(&chrono::Utc))
}

fn jittered_wait_until(reset_at: chrono::DateTime<chrono::Utc>) -> Duration {
    let base_secs = (reset_at - chrono::Utc::now()).num_milliseconds().max(0) as f64 / 1000.0;
    let jitter_fraction = rand::thread_rng().gen_range(-0.1..=0.1);
    let jittered = base_secs * (1.0 + jitter_fraction);
    Duration::from_secs_f64(jittered.clamp(0.0, 60.0))
}

pub struct ErrorLoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for ErrorLoggingMiddleware {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        let start = Instant::now();
        let method = req.method().clone();
        let url = req.url().clone();

        let result = next.run(req, extensions).await;

        let duration = start.elapsed();

        match &result {
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status();
                match status {
                    StatusCode::TOO_MANY_REQUESTS => {
                        debug!("Request failed due to rate-limit {} {} - Status: {}, Duration: {:?}", method, url, status, duration)
                    }
                    _ => error!("Request failed: {} {} - Status: {}, Duration: {:?}", method, url, status, duration),
                }
            }
            Err(e) => {
                error!("Request error: {} {} - Error: {}, Duration: {:?}", method, url, e, duration);
            }
            _ => {
                debug!("Request succeeded: {} {} - Duration: {:?}", method, url, duration);
            }
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn jitter_is_clamped_to_sixty_seconds() {
        let far_future = chrono::Utc::now() + ChronoDuration::seconds(1000);
        let wait = jittered_wait_until(far_future);
        assert!(wait.as_secs_f64() <= 60.0);
    }

    #[test]
    fn past_reset_time_waits_zero() {
        let past = chrono::Utc::now() - ChronoDuration::seconds(10);
        let wait = jittered_wait_until(past);
        assert_eq!(wait.as_secs_f64(), 0.0);
    }
}
