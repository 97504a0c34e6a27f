//! Distributed rate limiter + quota counters (C5, spec §4.5), backed by
//! etcd and falling back to counting persisted usage records when the KV
//! is unavailable.

use dashmap::DashMap;
use etcd_client::{Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp};
use gateway_core::repository::UsageWriter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_s: u64,
    pub retry_after_s: u64,
}

/// Per-`rateLimit`-value limiter cache, capped at `max_limiters` with
/// LRU eviction of the oldest-touched limiter (spec §4.5/§5).
pub struct RateLimiter {
    client: Client,
    limiters: DashMap<u32, AtomicU64>,
    max_limiters: usize,
    touch_order: DashMap<u32, u64>,
    touch_counter: AtomicU64,
}

impl RateLimiter {
    pub fn new(client: Client, max_limiters: usize) -> Self {
        Self {
            client,
            limiters: DashMap::new(),
            max_limiters,
            touch_order: DashMap::new(),
            touch_counter: AtomicU64::new(0),
        }
    }

    fn touch(&self, limit: u32) {
        if !self.limiters.contains_key(&limit) {
            if self.limiters.len() >= self.max_limiters {
                if let Some(oldest) = self.touch_order.iter().min_by_key(|e| *e.value()).map(|e| *e.key()) {
                    self.limiters.remove(&oldest);
                    self.touch_order.remove(&oldest);
                }
            }
            self.limiters.insert(limit, AtomicU64::new(0));
        }
        let seq = self.touch_counter.fetch_add(1, Ordering::Relaxed);
        self.touch_order.insert(limit, seq);
    }

    /// `key = rl:gw:<rateLimit>:<consumerKey>`; 1 point per call against a
    /// 60-second fixed window.
    pub async fn consume(&self, limit: u32, consumer_key: &str) -> anyhow::Result<RateLimitDecision> {
        self.touch(limit);
        let etcd_key = format!("rl:gw:{limit}:{consumer_key}");
        let count = self.incr_with_window(&etcd_key, 60).await?;
        let allowed = count <= limit as i64;
        Ok(RateLimitDecision {
            allowed,
            limit,
            remaining: (limit as i64 - count).max(0) as u32,
            reset_in_s: 60,
            retry_after_s: if allowed { 0 } else { 60 },
        })
    }

    /// Atomic compare-and-swap increment loop against etcd, with a lease
    /// set only on first creation so the window naturally expires.
    async fn incr_with_window(&self, key: &str, ttl_seconds: i64) -> anyhow::Result<i64> {
        loop {
            let resp = self.client.clone().get(key, None).await?;
            match resp.kvs().first() {
                Some(kv) => {
                    let current: i64 = std::str::from_utf8(kv.value())?.parse().unwrap_or(0);
                    let next = current + 1;
                    let txn = Txn::new()
                        .when(vec![Compare::mod_revision(key, CompareOp::Equal, kv.mod_revision())])
                        .and_then(vec![TxnOp::put(key, next.to_string(), None)]);
                    let txn_resp = self.client.clone().txn(txn).await?;
                    if txn_resp.succeeded() {
                        return Ok(next);
                    }
                    // Lost the race; retry.
                }
                None => {
                    let lease = self.client.clone().lease_grant(ttl_seconds, None).await?;
                    let txn = Txn::new()
                        .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
                        .and_then(vec![TxnOp::put(key, "1", Some(PutOptions::new().with_lease(lease.id())))]);
                    let txn_resp = self.client.clone().txn(txn).await?;
                    if txn_resp.succeeded() {
                        return Ok(1);
                    }
                    // Someone else created it first; retry.
                }
            }
        }
    }
}

/// `allowed = count <= limit` (spec §9 open question resolution applies
/// uniformly to rate limiting and quota).
pub struct QuotaCounter {
    client: Client,
    usage_fallback: Arc<dyn UsageWriter>,
}

impl QuotaCounter {
    pub fn new(client: Client, usage_fallback: Arc<dyn UsageWriter>) -> Self {
        Self { client, usage_fallback }
    }

    pub async fn check_daily(&self, scope_id: &str, consumer_suffix: &str, limit: Option<u64>) -> anyhow::Result<bool> {
        let Some(limit) = limit else { return Ok(true) };
        let now = chrono::Utc::now();
        let key = format!("gw:quota:d:{scope_id}:{consumer_suffix}:{}", now.format("%Y%m%d"));
        let ttl = seconds_until_end_of_day(now);
        self.check(&key, ttl, limit, scope_id, now - chrono::Duration::days(1)).await
    }

    pub async fn check_monthly(&self, scope_id: &str, consumer_suffix: &str, limit: Option<u64>) -> anyhow::Result<bool> {
        let Some(limit) = limit else { return Ok(true) };
        let now = chrono::Utc::now();
        let key = format!("gw:quota:m:{scope_id}:{consumer_suffix}:{}", now.format("%Y%m"));
        let ttl = seconds_until_end_of_month(now);
        self.check(&key, ttl, limit, scope_id, now - chrono::Duration::days(31)).await
    }

    async fn check(
        &self,
        key: &str,
        ttl_seconds: i64,
        limit: u64,
        scope_id: &str,
        fallback_since: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<bool> {
        match self.incr_atomic(key, ttl_seconds).await {
            Ok(count) => Ok(count <= limit),
            Err(_) => {
                let count = self.usage_fallback.count_since(scope_id, fallback_since).await?;
                Ok(count <= limit)
            }
        }
    }

    async fn incr_atomic(&self, key: &str, ttl_seconds: i64) -> anyhow::Result<u64> {
        loop {
            let resp = self.client.clone().get(key, None).await?;
            match resp.kvs().first() {
                Some(kv) => {
                    let current: u64 = std::str::from_utf8(kv.value())?.parse().unwrap_or(0);
                    let next = current + 1;
                    let txn = Txn::new()
                        .when(vec![Compare::mod_revision(key, CompareOp::Equal, kv.mod_revision())])
                        .and_then(vec![TxnOp::put(key, next.to_string(), None)]);
                    if self.client.clone().txn(txn).await?.succeeded() {
                        return Ok(next);
                    }
                }
                None => {
                    let lease = self.client.clone().lease_grant(ttl_seconds, None).await?;
                    let txn = Txn::new()
                        .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
                        .and_then(vec![TxnOp::put(key, "1", Some(PutOptions::new().with_lease(lease.id())))]);
                    if self.client.clone().txn(txn).await?.succeeded() {
                        return Ok(1);
                    }
                }
            }
        }
    }
}

fn seconds_until_end_of_day(now: chrono::DateTime<chrono::Utc>) -> i64 {
    let tomorrow = (now + chrono::Duration::days(1)).date_naive().and_hms_opt(0, 0, 0).unwrap();
    let end = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(tomorrow, chrono::Utc);
    (end - now).num_seconds().max(1)
}

fn seconds_until_end_of_month(now: chrono::DateTime<chrono::Utc>) -> i64 {
    use chrono::Datelike;
    let (next_year, next_month) = if now.month() == 12 { (now.year() + 1, 1) } else { (now.year(), now.month() + 1) };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let end = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(first_of_next, chrono::Utc);
    (end - now).num_seconds().max(1)
}

/// The consumer-key suffix used in rate-limit and quota keys: the API key
/// id when present, else `session:<callerId>` (spec §4.5).
pub fn consumer_key(api_key_id: Option<&str>, caller_id: &str) -> String {
    match api_key_id {
        Some(id) => id.to_string(),
        None => format!("session:{caller_id}"),
    }
}
