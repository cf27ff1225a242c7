//! Per-client fixed-window rate limiting.
//!
//! One limiter per protected route, attached with
//! `middleware::from_fn_with_state`. Clients are keyed by peer IP; each gets
//! `max_hits` requests per window, then 429 until the window rolls over.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::warn;

use crate::errors::AppError;

/// Tracked-client cap; at this size stale windows are swept before inserting.
const MAX_TRACKED_CLIENTS: usize = 10_000;

struct WindowSlot {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_hits: u32,
    hits: tokio::sync::Mutex<HashMap<IpAddr, WindowSlot>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_hits: u32) -> Self {
        Self {
            window,
            max_hits,
            hits: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now()).await
    }

    async fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;

        if hits.len() >= MAX_TRACKED_CLIENTS {
            let window = self.window;
            hits.retain(|_, slot| now.duration_since(slot.window_start) < window);
        }

        let slot = hits.entry(ip).or_insert(WindowSlot {
            window_start: now,
            count: 0,
        });
        if now.duration_since(slot.window_start) >= self.window {
            slot.window_start = now;
            slot.count = 0;
        }
        slot.count += 1;
        slot.count <= self.max_hits
    }
}

/// Middleware enforcing a [`RateLimiter`] on the wrapped route.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Routers driven without a real socket (tests) have no peer address.
    let ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !limiter.allow(ip).await {
        warn!("Rate limit hit for {ip} on {}", request.uri().path());
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_requests_within_the_budget_pass() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at(ip(1), now).await);
        }
        assert!(!limiter.allow_at(ip(1), now).await, "fourth request is over budget");
    }

    #[tokio::test]
    async fn test_the_window_rolls_over() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let start = Instant::now();
        assert!(limiter.allow_at(ip(1), start).await);
        assert!(!limiter.allow_at(ip(1), start + Duration::from_secs(59)).await);
        assert!(limiter.allow_at(ip(1), start + Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(limiter.allow_at(ip(1), now).await);
        assert!(!limiter.allow_at(ip(1), now).await);
        assert!(limiter.allow_at(ip(2), now).await, "a different client has its own budget");
    }
}
