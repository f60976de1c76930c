// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Per-remote-address token bucket for the registration endpoint.
//!
//! A rate-limited request is rejected before the store is touched. Keys are
//! taken from `X-Forwarded-For` / `X-Real-IP` when a reverse proxy supplies
//! them, falling back to the peer address of the connection.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

use crate::AppState;

/// A token bucket per client key.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-process token bucket rate limiter.
///
/// Buckets start full (allowing the configured burst) and refill
/// continuously at `refill_per_sec` tokens per second.
pub struct RateLimiter {
    refill_per_sec: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter with the given refill rate and burst capacity.
    #[must_use]
    pub fn new(refill_per_sec: f64, burst: u32) -> Self {
        Self {
            refill_per_sec,
            burst: f64::from(burst),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for `key`; returns whether the request may proceed.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now: Instant = Instant::now();
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned lock means a panic elsewhere; fail open so the
            // registration path keeps working.
            return true;
        };

        let bucket: &mut Bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed: f64 = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Error body for rate-limited requests, matching the gateway's error shape.
#[derive(Debug, Serialize)]
struct RateLimitedBody {
    success: bool,
    error: &'static str,
    message: &'static str,
}

/// Middleware enforcing the registration token bucket.
pub async fn registration_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key: String = client_key(&request);
    if state.rate_limiter.try_acquire(&key) {
        next.run(request).await
    } else {
        warn!(client = %key, "Registration rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(RateLimitedBody {
                success: false,
                error: "RateLimited",
                message: "Too many requests",
            }),
        )
            .into_response()
    }
}

/// Derives the rate-limit key for a request.
///
/// Proxy headers win over the socket peer so limits apply to the real client
/// behind a reverse proxy.
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        return first.trim().to_string();
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
    {
        return real_ip.trim().to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| String::from("unknown"), |info| info.0.ip().to_string())
}
