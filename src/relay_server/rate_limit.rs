//! Per-IP sliding-window rate limiting.
//!
//! Hand-rolled over a `tokio::sync::Mutex<HashMap<...>>` rather than
//! pulling in an external rate-limiting crate — the algorithm is small and
//! this crate already favors small explicit state machines (`ChannelError`,
//! `EncryptedChannel`'s keepalive) over extra dependencies for things this
//! size.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: u32,
    requests: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request from `ip` and returns whether it's within budget.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut table = self.requests.lock().await;
        let entry = table.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < WINDOW);
        if entry.len() as u32 >= self.limit {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(30);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..30 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn test_different_ips_tracked_independently() {
        let limiter = RateLimiter::new(1);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a).await);
        assert!(limiter.check(b).await);
        assert!(!limiter.check(a).await);
    }
}
