//! Per-IP sliding-window throttling for the route groups.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Route groups with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Dates and slots lookups.
    Read,
    /// Placing a hold.
    Booking,
    /// The client's own appointments and cancellations.
    Client,
    Admin,
}

impl Tier {
    /// (requests, window)
    pub fn budget(self) -> (usize, Duration) {
        match self {
            Tier::Read => (60, Duration::from_secs(60)),
            Tier::Booking => (5, Duration::from_secs(300)),
            Tier::Client => (30, Duration::from_secs(60)),
            Tier::Admin => (120, Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Throttle {
    hits: Arc<DashMap<(Tier, IpAddr), VecDeque<Instant>>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hit at `now`. `Err(retry_after_secs)` when the budget is spent.
    pub fn hit(&self, tier: Tier, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let (limit, window) = tier.budget();
        self.hit_with(tier, ip, now, limit, window)
    }

    fn hit_with(&self, tier: Tier, ip: IpAddr, now: Instant, limit: usize, window: Duration) -> Result<(), u64> {
        let mut hits = self.hits.entry((tier, ip)).or_default();

        while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
            hits.pop_front();
        }

        if hits.len() >= limit {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now).as_secs())
                .unwrap_or(0)
                .max(1);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drops counters whose newest hit is outside their window.
    pub fn purge(&self, now: Instant) {
        self.hits.retain(|(tier, _), hits| {
            let (_, window) = tier.budget();
            hits.back().is_some_and(|t| now.duration_since(*t) < window)
        });
    }

    pub fn tracked(&self) -> usize {
        self.hits.len()
    }
}

/// Client IP: first `X-Forwarded-For` entry (reverse proxy), else the peer address.
pub fn client_ip(req: &Request) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Middleware state: the shared throttle plus the tier of the guarded group.
#[derive(Debug, Clone)]
pub struct Guard {
    pub throttle: Throttle,
    pub tier: Tier,
}

impl Guard {
    pub fn new(throttle: &Throttle, tier: Tier) -> Self {
        Self {
            throttle: throttle.clone(),
            tier,
        }
    }
}

pub async fn throttle(State(guard): State<Guard>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);
    match guard.throttle.hit(guard.tier, ip, Instant::now()) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::debug!("Throttled {} on {:?}", ip, guard.tier);
            let body = ApiResponse::<()>::error(format!(
                "Too many requests. Try again in {} seconds",
                retry_after
            ));
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.to_string())],
                Json(body),
            )
                .into_response()
        }
    }
}
