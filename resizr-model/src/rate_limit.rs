//! `RateGate` (spec.md §4.7): a process-local token bucket limiter keyed by
//! `(client_ip, route_class)`. No cross-process coordination is provided by
//! design.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use resizr_util::config::RateLimitConfig;

/// The route an incoming request is billed against. `Unlimited` covers
/// anything not named here (e.g. `/auth/*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Upload,
    Download,
    Info,
    Unlimited,
}

/// Map is GC'd back down to this size once it exceeds [`GC_THRESHOLD`].
const GC_THRESHOLD: usize = 10_000;
const GC_TARGET: usize = 5_000;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(per_minute_limit: u32) -> Self {
        let capacity = (per_minute_limit as f64) * 2.0;
        Bucket {
            tokens: capacity,
            capacity,
            refill_per_sec: per_minute_limit as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Limit/remaining/reset view of a bucket at the moment of a decision, used
/// by the HTTP layer to set `X-RateLimit-*` (and `Retry-After` on 429).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

pub enum RateLimitOutcome {
    Allowed(RateLimitSnapshot),
    Limited(RateLimitSnapshot),
}

pub struct RateGate {
    limits: [u32; 3], // indexed by RouteClass (Unlimited excluded, never limited)
    buckets: Mutex<HashMap<(IpAddr, RouteClass), Bucket>>,
}

impl RateGate {
    pub fn new(config: &RateLimitConfig) -> Self {
        RateGate {
            limits: [
                config.upload_per_minute,
                config.download_per_minute,
                config.info_per_minute,
            ],
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::Upload => self.limits[0],
            RouteClass::Download => self.limits[1],
            RouteClass::Info => self.limits[2],
            RouteClass::Unlimited => 0,
        }
    }

    /// Attempts to consume one token for `(client_ip, class)`. A configured
    /// limit of `0` (or `Unlimited`) always allows, with a snapshot of
    /// `limit: 0`.
    pub fn check(&self, client_ip: IpAddr, class: RouteClass) -> RateLimitOutcome {
        let limit = self.limit_for(class);
        if limit == 0 {
            return RateLimitOutcome::Allowed(RateLimitSnapshot {
                limit: 0,
                remaining: 0,
                reset_secs: 0,
            });
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.len() > GC_THRESHOLD {
            gc(&mut buckets);
        }
        let bucket = buckets
            .entry((client_ip, class))
            .or_insert_with(|| Bucket::new(limit));

        let allowed = bucket.try_consume(now);
        let remaining = bucket.tokens.floor().max(0.0) as u32;
        let deficit = (1.0 - bucket.tokens).max(0.0);
        let reset_secs = if bucket.refill_per_sec > 0.0 {
            (deficit / bucket.refill_per_sec).ceil() as u64
        } else {
            60
        };
        let snapshot = RateLimitSnapshot {
            limit,
            remaining,
            reset_secs,
        };
        if allowed {
            RateLimitOutcome::Allowed(snapshot)
        } else {
            RateLimitOutcome::Limited(snapshot)
        }
    }
}

/// Drops the oldest-touched entries (by `last_refill`) until the map is back
/// at [`GC_TARGET`]. Not LRU-precise, just a simple size cap (spec.md §4.7).
fn gc(buckets: &mut HashMap<(IpAddr, RouteClass), Bucket>) {
    let mut keys: Vec<_> = buckets
        .iter()
        .map(|(k, b)| (*k, b.last_refill))
        .collect();
    keys.sort_by_key(|(_, last_refill)| *last_refill);
    let to_remove = buckets.len().saturating_sub(GC_TARGET);
    for (key, _) in keys.into_iter().take(to_remove) {
        buckets.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n: u32) -> RateLimitConfig {
        RateLimitConfig {
            upload_per_minute: n,
            download_per_minute: n,
            info_per_minute: n,
        }
    }

    #[test]
    fn burst_plus_one_trips_the_limiter() {
        let gate = RateGate::new(&config(1));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        // burst = 2 * 1 = 2
        assert!(matches!(
            gate.check(ip, RouteClass::Upload),
            RateLimitOutcome::Allowed(_)
        ));
        assert!(matches!(
            gate.check(ip, RouteClass::Upload),
            RateLimitOutcome::Allowed(_)
        ));
        assert!(matches!(
            gate.check(ip, RouteClass::Upload),
            RateLimitOutcome::Limited(_)
        ));
    }

    #[test]
    fn zero_limit_never_limits() {
        let gate = RateGate::new(&config(0));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..100 {
            assert!(matches!(
                gate.check(ip, RouteClass::Download),
                RateLimitOutcome::Allowed(_)
            ));
        }
    }

    #[test]
    fn distinct_ips_have_independent_buckets() {
        let gate = RateGate::new(&config(1));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        gate.check(a, RouteClass::Upload);
        gate.check(a, RouteClass::Upload);
        assert!(matches!(
            gate.check(b, RouteClass::Upload),
            RateLimitOutcome::Allowed(_)
        ));
    }

    #[test]
    fn gc_caps_the_map_back_down() {
        let gate = RateGate::new(&config(100));
        for i in 0..(GC_THRESHOLD + 10) {
            let ip: IpAddr = std::net::Ipv4Addr::from(i as u32).into();
            gate.check(ip, RouteClass::Info);
        }
        let len = gate.buckets.lock().unwrap().len();
        assert!(len <= GC_THRESHOLD);
    }
}
