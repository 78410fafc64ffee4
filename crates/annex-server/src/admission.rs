//! Admission layer: token-bucket rate limiting and the capability gate.
//!
//! Every inbound call traverses the rate limiter before any handler
//! logic runs. Buckets are keyed by `(remote_ip, endpoint_class)` with
//! per-class budgets from the active server policy; the budget is
//! consumed exactly once per request, regardless of store retries behind
//! it. Mutating handlers additionally pass the capability gate, which
//! reads `platform_identities` at call time, so capability edits take
//! effect on the very next request.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use annex_identity::{get_platform_identity, PlatformIdentity};
use annex_types::{Capabilities, ErrorKind};

use crate::api::ApiError;
use crate::AppState;

/// Endpoint classes with separate admission budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Registration,
    Verification,
    Default,
}

impl EndpointClass {
    /// Classifies a request path.
    pub fn of_path(path: &str) -> Self {
        match path {
            "/api/registry/register" => Self::Registration,
            "/api/zk/verify-membership" => Self::Verification,
            _ => Self::Default,
        }
    }
}

/// One token bucket: a fractional token count and its last refill time.
#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited {
        /// Seconds until one token is available again.
        retry_after_seconds: u64,
    },
}

/// In-memory token-bucket rate limiter.
///
/// Buckets refill continuously at `limit` tokens per 60 s and cap at
/// `limit`, so a full window of burst is available after idle time but
/// sustained traffic converges on the configured rate.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<(IpAddr, EndpointClass), Bucket>>>,
}

/// Entry cap before idle buckets are evicted.
const EVICTION_THRESHOLD: usize = 10_000;

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one token from the bucket for `(ip, class)`.
    pub fn check(&self, ip: IpAddr, class: EndpointClass, limit: u32) -> Decision {
        if limit == 0 {
            return Decision::Limited {
                retry_after_seconds: 60,
            };
        }

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Refusing all traffic over a poisoned counter map would be
                // a self-inflicted denial of service; a stale counter is
                // the lesser harm.
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };

        let now = Instant::now();

        if state.len() > EVICTION_THRESHOLD {
            state.retain(|_, bucket| now.duration_since(bucket.last_refill).as_secs() < 120);
        }

        let rate_per_sec = f64::from(limit) / 60.0;
        let bucket = state.entry((ip, class)).or_insert(Bucket {
            tokens: f64::from(limit),
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate_per_sec).min(f64::from(limit));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_seconds = (deficit / rate_per_sec).ceil().clamp(1.0, 60.0) as u64;
            Decision::Limited {
                retry_after_seconds,
            }
        }
    }
}

/// Best-effort client IP: the socket address when the listener provides
/// it, otherwise `X-Forwarded-For` (reverse-proxy deployments).
fn client_ip(req: &Request<Body>) -> IpAddr {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Rate limiting middleware. Rejections carry the remaining-window hint
/// in the uniform error body.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ApiError::internal("missing app state"))?
        .clone();

    let class = EndpointClass::of_path(req.uri().path());
    let ip = client_ip(&req);

    let limit = {
        let policy = state
            .policy
            .read()
            .map_err(|_| ApiError::internal("policy lock poisoned"))?;
        match class {
            EndpointClass::Registration => policy.rate_limit.registration_limit,
            EndpointClass::Verification => policy.rate_limit.verification_limit,
            EndpointClass::Default => policy.rate_limit.default_limit,
        }
    };

    match state.rate_limiter.check(ip, class, limit) {
        Decision::Allowed => Ok(next.run(req).await),
        Decision::Limited {
            retry_after_seconds,
        } => {
            tracing::debug!(%ip, ?class, retry_after_seconds, "request rate limited");
            Err(ApiError::rate_limited(retry_after_seconds))
        }
    }
}

/// Looks up the calling identity from the `X-Annex-Pseudonym` header and
/// requires `check` to pass on its capabilities.
///
/// Reads the store at call time (no caching), so a revoked capability
/// takes effect immediately.
pub fn require_capability(
    conn: &rusqlite::Connection,
    server_id: i64,
    pseudonym: &str,
    check: fn(&Capabilities) -> bool,
    capability_name: &str,
) -> Result<PlatformIdentity, ApiError> {
    let identity = get_platform_identity(conn, server_id, pseudonym)
        .map_err(ApiError::from)?
        .ok_or_else(|| {
            ApiError::new(ErrorKind::NotFound, format!("unknown pseudonym '{pseudonym}'"))
        })?;

    if !identity.active {
        return Err(ApiError::new(
            ErrorKind::FederationDenied,
            "identity is deactivated",
        ));
    }
    if !check(&identity.capabilities) {
        return Err(ApiError::new(
            ErrorKind::FederationDenied,
            format!("caller lacks the {capability_name} capability"),
        ));
    }

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_classification() {
        assert_eq!(
            EndpointClass::of_path("/api/registry/register"),
            EndpointClass::Registration
        );
        assert_eq!(
            EndpointClass::of_path("/api/zk/verify-membership"),
            EndpointClass::Verification
        );
        assert_eq!(EndpointClass::of_path("/health"), EndpointClass::Default);
        assert_eq!(
            EndpointClass::of_path("/api/federation/handshake"),
            EndpointClass::Default
        );
    }

    #[test]
    fn eleventh_request_in_window_is_limited() {
        let limiter = RateLimiter::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for i in 0..10 {
            assert_eq!(
                limiter.check(ip, EndpointClass::Registration, 10),
                Decision::Allowed,
                "request {i} should pass"
            );
        }

        match limiter.check(ip, EndpointClass::Registration, 10) {
            Decision::Limited {
                retry_after_seconds,
            } => {
                assert!(retry_after_seconds >= 1 && retry_after_seconds <= 60);
            }
            Decision::Allowed => panic!("11th request must be limited"),
        }
    }

    #[test]
    fn buckets_are_isolated_by_ip_and_class() {
        let limiter = RateLimiter::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..10 {
            limiter.check(a, EndpointClass::Registration, 10);
        }
        assert!(matches!(
            limiter.check(a, EndpointClass::Registration, 10),
            Decision::Limited { .. }
        ));

        // A different IP and a different class both still have budget.
        assert_eq!(limiter.check(b, EndpointClass::Registration, 10), Decision::Allowed);
        assert_eq!(limiter.check(a, EndpointClass::Verification, 30), Decision::Allowed);
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let limiter = RateLimiter::new();
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        assert!(matches!(
            limiter.check(ip, EndpointClass::Default, 0),
            Decision::Limited { .. }
        ));
    }
}
