use crate::backend::{ceil_secs, Backend, ClientKey, Decision, LimiterConfig};
use crate::middleware::builder::LimitOutput;
use crate::response::too_many_requests;
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use actix_web::{HttpResponse, ResponseError};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

type Window = VecDeque<Instant>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Time window of {window:?} overflows the clock for key {key}")]
    WindowOverflow {
        key: ClientKey,
        limit: u64,
        window: Duration,
    },
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        match self {
            // Unable to work out when a slot frees up, deny for a full window.
            Error::WindowOverflow { key, limit, window } => {
                too_many_requests(*limit, ceil_secs(*window), ceil_secs(*window), key)
            }
        }
    }
}

/// A Sliding Window rate limiter [Backend] that uses [Dashmap](dashmap::DashMap) to store the
/// admission timestamps of each key in memory.
///
/// The shard lock held by a map entry covers the whole evict-compare-append sequence, so
/// concurrent requests from the same key observe each other's admissions in order.
#[derive(Clone)]
pub struct SlidingWindowBackend {
    config: LimiterConfig,
    map: Arc<DashMap<String, Window>>,
    gc_handle: Option<Arc<JoinHandle<()>>>,
}

/// Output from a [SlidingWindowBackend].
#[derive(Debug, Clone)]
pub struct SlidingWindowOutput {
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted before the window is full.
    pub remaining: u64,
    /// Length of the trailing window.
    pub window: Duration,
    /// Time until the oldest request in the window expires, freeing a slot.
    ///
    /// For a denied request this is the advisory retry-after duration.
    pub reset_after: Duration,
    /// The key the request was counted against.
    pub client_key: ClientKey,
}

impl LimitOutput for SlidingWindowOutput {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Seconds until a slot frees up (rounded upwards, so that a retry after waiting for the
    /// duration is guaranteed to find the oldest request expired).
    fn seconds_until_reset(&self) -> u64 {
        ceil_secs(self.reset_after)
    }

    fn window_secs(&self) -> u64 {
        ceil_secs(self.window)
    }

    fn client_key(&self) -> &ClientKey {
        &self.client_key
    }
}

impl SlidingWindowBackend {
    pub fn builder(config: LimiterConfig) -> SlidingWindowBackendBuilder {
        SlidingWindowBackendBuilder {
            config,
            gc_interval: None,
        }
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Decide whether a request from `key` arriving at `now` is admitted.
    ///
    /// Timestamps at or before `now - time_window` are evicted first, on every call. A denied
    /// request is not recorded and does not consume a slot.
    pub fn check_and_record(
        &self,
        key: &ClientKey,
        now: Instant,
    ) -> Result<(Decision, SlidingWindowOutput), Error> {
        let LimiterConfig {
            max_requests,
            time_window,
        } = self.config;
        let mut window = self.map.entry(key.as_str().to_owned()).or_default();

        // No cutoff means the window reaches back before the clock started, nothing is expired.
        if let Some(cutoff) = now.checked_sub(time_window) {
            while window.front().is_some_and(|&t| t <= cutoff) {
                window.pop_front();
            }
        }

        let count = window.len() as u64;
        let allowed = count < max_requests;

        // Oldest timestamp once this request is recorded, worked out before anything is
        // recorded so that an overflow leaves the window untouched.
        let oldest = match window.front() {
            Some(&t) => Some(t),
            None if allowed => Some(now),
            None => None,
        };
        let reset_after = match oldest {
            Some(oldest) => oldest
                .checked_add(time_window)
                .ok_or_else(|| Error::WindowOverflow {
                    key: key.clone(),
                    limit: max_requests,
                    window: time_window,
                })?
                .saturating_duration_since(now),
            None => Duration::ZERO,
        };

        if allowed {
            window.push_back(now);
        }
        let output = SlidingWindowOutput {
            limit: max_requests,
            remaining: max_requests.saturating_sub(window.len() as u64),
            window: time_window,
            reset_after,
            client_key: key.clone(),
        };
        Ok((Decision::from_allowed(allowed), output))
    }

    /// Removes the window for a given key.
    pub fn remove_key(&self, key: &ClientKey) {
        self.map.remove(key.as_str());
    }

    /// Number of timestamps currently held for a key, without evicting anything.
    pub fn window_len(&self, key: &ClientKey) -> usize {
        self.map.get(key.as_str()).map_or(0, |w| w.len())
    }

    fn garbage_collector(
        map: Arc<DashMap<String, Window>>,
        time_window: Duration,
        interval: Duration,
    ) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                // A window whose newest timestamp expired holds nothing but expired timestamps.
                map.retain(|_k, w| {
                    w.back()
                        .is_some_and(|&t| now.saturating_duration_since(t) < time_window)
                });
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend<ClientKey> for SlidingWindowBackend {
    type Output = SlidingWindowOutput;
    type Error = Error;

    async fn request(&self, input: ClientKey) -> Result<(Decision, Self::Output), Self::Error> {
        let result = self.check_and_record(&input, Instant::now());
        if let Ok((decision, output)) = &result {
            log::debug!(
                "Sliding window decision for {input}: {decision:?} ({} remaining)",
                output.remaining
            );
        }
        result
    }
}

impl Drop for SlidingWindowBackend {
    fn drop(&mut self) {
        // Only the last clone stops the collector.
        if let Some(handle) = self.gc_handle.take() {
            if let Some(handle) = Arc::into_inner(handle) {
                handle.abort();
            }
        }
    }
}

pub struct SlidingWindowBackendBuilder {
    config: LimiterConfig,
    gc_interval: Option<Duration>,
}

impl SlidingWindowBackendBuilder {
    /// Enable the garbage collector, which periodically removes windows whose every timestamp
    /// has expired.
    ///
    /// Disabled by default, in which case a window lives for the lifetime of the backend.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> SlidingWindowBackend {
        let map = Arc::new(DashMap::<String, Window>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(SlidingWindowBackend::garbage_collector(
                map.clone(),
                self.config.time_window,
                gc_interval,
            ))
        });
        SlidingWindowBackend {
            config: self.config,
            map,
            gc_handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn backend(max_requests: u64) -> SlidingWindowBackend {
        SlidingWindowBackend::builder(LimiterConfig::new(max_requests, MINUTE).unwrap()).build()
    }

    // A base instant far enough from the clock origin that the cutoff always exists.
    fn base() -> Instant {
        Instant::now() + MINUTE * 10
    }

    #[test]
    fn test_burst_then_deny() {
        let backend = backend(5);
        let key = ClientKey::from("10.0.0.1");
        let t0 = base();
        for i in (0..5).rev() {
            // First 5 should be allowed
            let (decision, output) = backend.check_and_record(&key, t0).unwrap();
            assert!(decision.is_allowed());
            assert_eq!(output.remaining, i);
            assert_eq!(output.limit, 5);
        }
        // Sixth should be denied, with the oldest request a full window from expiry
        let (decision, output) = backend.check_and_record(&key, t0).unwrap();
        assert!(decision.is_denied());
        assert_eq!(output.remaining, 0);
        assert_eq!(output.reset_after, MINUTE);
        assert_eq!(output.seconds_until_reset(), 60);
        // The denied request did not consume a slot
        assert_eq!(backend.window_len(&key), 5);

        // Retried after the window has passed, should now be allowed
        let (decision, _) = backend
            .check_and_record(&key, t0 + Duration::from_secs(61))
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_retry_exactly_at_expiry() {
        let backend = backend(2);
        let key = ClientKey::from("10.0.0.1");
        let t0 = base();
        backend.check_and_record(&key, t0).unwrap();
        backend
            .check_and_record(&key, t0 + Duration::from_secs(10))
            .unwrap();
        let now = t0 + Duration::from_secs(30);
        let (decision, output) = backend.check_and_record(&key, now).unwrap();
        assert!(decision.is_denied());
        assert_eq!(output.reset_after, Duration::from_secs(30));

        // Waiting exactly retry_after evicts the oldest request only
        let (decision, _) = backend
            .check_and_record(&key, now + output.reset_after)
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(backend.window_len(&key), 2);
    }

    #[test]
    fn test_sliding_not_fixed() {
        let backend = backend(2);
        let key = ClientKey::from("10.0.0.1");
        let t0 = base();
        backend.check_and_record(&key, t0).unwrap();
        backend
            .check_and_record(&key, t0 + Duration::from_secs(50))
            .unwrap();
        // The first request has expired, the second is still in the window
        let t1 = t0 + Duration::from_secs(70);
        let (decision, _) = backend.check_and_record(&key, t1).unwrap();
        assert!(decision.is_allowed());
        let (decision, output) = backend.check_and_record(&key, t1).unwrap();
        assert!(decision.is_denied());
        assert_eq!(output.reset_after, Duration::from_secs(40));
    }

    #[test]
    fn test_key_isolation() {
        let backend = backend(1);
        let t0 = base();
        let (decision, _) = backend.check_and_record(&"KEY1".into(), t0).unwrap();
        assert!(decision.is_allowed());
        let (decision, _) = backend.check_and_record(&"KEY1".into(), t0).unwrap();
        assert!(decision.is_denied());
        // Another key is unaffected
        let (decision, output) = backend.check_and_record(&"KEY2".into(), t0).unwrap();
        assert!(decision.is_allowed());
        assert_eq!(output.client_key.as_str(), "KEY2");
        assert_eq!(backend.window_len(&"KEY1".into()), 1);
    }

    #[test]
    fn test_repeated_checks_keep_live_entries() {
        let backend = backend(3);
        let key = ClientKey::from("KEY1");
        let t0 = base();
        for _ in 0..3 {
            backend.check_and_record(&key, t0).unwrap();
        }
        // Denied calls with no time advance must not drop anything
        for _ in 0..10 {
            let (decision, _) = backend.check_and_record(&key, t0).unwrap();
            assert!(decision.is_denied());
            assert_eq!(backend.window_len(&key), 3);
        }
    }

    #[test]
    fn test_eviction_runs_on_allow() {
        let backend = backend(5);
        let key = ClientKey::from("KEY1");
        let t0 = base();
        for _ in 0..3 {
            backend.check_and_record(&key, t0).unwrap();
        }
        // A long idle key sheds its stale entries on the next call, even though it is allowed
        backend.check_and_record(&key, t0 + MINUTE * 5).unwrap();
        assert_eq!(backend.window_len(&key), 1);
    }

    #[test]
    fn test_zero_max_requests_denies() {
        let config = LimiterConfig {
            max_requests: 0,
            time_window: MINUTE,
        };
        let backend = SlidingWindowBackend::builder(config).build();
        let key = ClientKey::from("KEY1");
        let (decision, output) = backend.check_and_record(&key, base()).unwrap();
        assert!(decision.is_denied());
        assert_eq!(output.reset_after, Duration::ZERO);
        assert_eq!(backend.window_len(&key), 0);
    }

    #[test]
    fn test_concurrent_same_key() {
        let backend = backend(10);
        let key = ClientKey::from("KEY1");
        let now = base();
        let allowed = std::sync::atomic::AtomicU64::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        let (decision, _) = backend.check_and_record(&key, now).unwrap();
                        if decision.is_allowed() {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        // Exactly the capacity was admitted
        assert_eq!(allowed.into_inner(), 10);
        assert_eq!(backend.window_len(&key), 10);
    }

    #[actix_web::test]
    async fn test_backend_request() {
        tokio::time::pause();
        let backend = backend(1);
        let (decision, output) = backend.request("KEY1".into()).await.unwrap();
        assert!(decision.is_allowed());
        assert_eq!(output.reset_after, MINUTE);
        tokio::time::advance(Duration::from_secs(20)).await;
        let (decision, output) = backend.request("KEY1".into()).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(output.reset_after, Duration::from_secs(40));
        tokio::time::advance(Duration::from_secs(40)).await;
        let (decision, _) = backend.request("KEY1".into()).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[actix_web::test]
    async fn test_garbage_collection() {
        tokio::time::pause();
        let backend = SlidingWindowBackend::builder(LimiterConfig::new(5, MINUTE).unwrap())
            .with_gc_interval(Some(MINUTE))
            .build();
        backend.request("KEY1".into()).await.unwrap();
        assert!(backend.map.contains_key("KEY1"));
        // Advance time such that the garbage collector runs, KEY1 has expired.
        tokio::time::advance(MINUTE + Duration::from_secs(1)).await;
        assert!(!backend.map.contains_key("KEY1"));

        backend.request("KEY2".into()).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        backend.request("KEY3".into()).await.unwrap();
        // The next pass falls inside this advance, expired KEY2 should be cleaned,
        // but KEY3 should remain.
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(!backend.map.contains_key("KEY2"));
        assert!(backend.map.contains_key("KEY3"));
    }

    #[test]
    fn test_overflow_leaves_window_untouched() {
        let config = LimiterConfig {
            max_requests: 5,
            time_window: Duration::from_secs(u64::MAX),
        };
        let backend = SlidingWindowBackend::builder(config).build();
        let key = ClientKey::from("KEY1");
        let result = backend.check_and_record(&key, Instant::now());
        assert!(matches!(result, Err(Error::WindowOverflow { .. })));
        // Nothing was recorded for the failed check
        assert_eq!(backend.window_len(&key), 0);
    }

    #[actix_web::test]
    async fn test_overflow_error_response() {
        let error = Error::WindowOverflow {
            key: "10.0.0.1".into(),
            limit: 5,
            window: Duration::from_millis(1500),
        };
        let response = error.error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::TOO_MANY_REQUESTS);
        let body = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["client_key"], "10.0.0.1");
        assert_eq!(json["window"], 2);
        assert_eq!(json["retry_after"], 2);
    }

    #[test]
    fn test_fractional_window_secs() {
        let backend = SlidingWindowBackend::builder(
            LimiterConfig::new(1, Duration::from_millis(500)).unwrap(),
        )
        .build();
        let (_, output) = backend.check_and_record(&"KEY1".into(), base()).unwrap();
        assert_eq!(output.window_secs(), 1);
    }

    #[test]
    fn test_remove_key() {
        let backend = backend(1);
        let key = ClientKey::from("KEY1");
        let t0 = base();
        let (decision, _) = backend.check_and_record(&key, t0).unwrap();
        assert!(decision.is_allowed());
        let (decision, _) = backend.check_and_record(&key, t0).unwrap();
        assert!(decision.is_denied());
        backend.remove_key(&key);
        // Window should have been reset
        let (decision, _) = backend.check_and_record(&key, t0).unwrap();
        assert!(decision.is_allowed());
    }
}
