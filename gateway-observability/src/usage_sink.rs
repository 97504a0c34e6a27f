//! Usage sink (C16, spec §4.16). Two deployment modes: short-lived
//! (fire-and-forget immediate writes, tolerating loss on cold shutdown)
//! and long-lived (buffered with size/time/backpressure flush triggers).

use gateway_core::model::UsageRecord;
use gateway_core::repository::UsageWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

const FLUSH_SIZE: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const BACKPRESSURE_LIMIT: usize = 500;
const MAX_FLUSH_RETRIES: u32 = 2;

pub enum SinkMode {
    /// Write each record immediately, fire-and-forget.
    ShortLived,
    /// Buffer and flush on size/time/backpressure/shutdown triggers.
    LongLived,
}

pub struct UsageSink {
    writer: Arc<dyn UsageWriter>,
    mode: SinkMode,
    buffer: Mutex<Vec<UsageRecord>>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl UsageSink {
    pub fn new(writer: Arc<dyn UsageWriter>, mode: SinkMode) -> Arc<Self> {
        let sink = Arc::new(Self {
            writer,
            mode,
            buffer: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        });
        if matches!(sink.mode, SinkMode::LongLived) {
            sink.clone().spawn_flush_timer();
        }
        sink
    }

    /// Record one completed request's usage. Never fails the request that
    /// calls it; write failures are logged, not propagated.
    pub async fn record(&self, record: UsageRecord) {
        match self.mode {
            SinkMode::ShortLived => {
                let writer = self.writer.clone();
                tokio::spawn(async move {
                    if let Err(err) = writer.write_batch(&[record]).await {
                        tracing::warn!(error = %err, "usage write failed, record lost");
                    }
                });
            }
            SinkMode::LongLived => {
                let should_flush = {
                    let mut buffer = self.buffer.lock().unwrap();
                    buffer.push(record);
                    buffer.len() >= FLUSH_SIZE || buffer.len() >= BACKPRESSURE_LIMIT
                };
                if should_flush {
                    self.flush().await;
                }
            }
        }
    }

    fn spawn_flush_timer(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(FLUSH_INTERVAL) => {
                        if self.shutdown.load(Ordering::Acquire) {
                            return;
                        }
                        self.flush().await;
                    }
                    _ = self.notify.notified() => {
                        return;
                    }
                }
            }
        });
    }

    /// Swap the buffer out and write it in a bulk insert, retrying up to
    /// `MAX_FLUSH_RETRIES` times with the failed batch re-prepended before
    /// dropping it and logging the count (spec §4.16).
    pub async fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let mut pending = batch;
        for attempt in 0..=MAX_FLUSH_RETRIES {
            match self.writer.write_batch(&pending).await {
                Ok(()) => return,
                Err(err) => {
                    if attempt == MAX_FLUSH_RETRIES {
                        tracing::error!(count = pending.len(), error = %err, "dropping usage records after exhausting retries");
                        return;
                    }
                    tracing::warn!(error = %err, attempt, "usage flush failed, retrying");
                    let mut buffer = self.buffer.lock().unwrap();
                    pending.append(&mut buffer);
                    std::mem::swap(&mut pending, &mut buffer);
                    pending = std::mem::take(&mut buffer);
                }
            }
        }
    }

    /// Final flush on shutdown. The flush timer is stopped so it never
    /// blocks process exit.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.flush().await;
    }
}

#[allow(dead_code)]
fn _measure(start: Instant) -> Duration {
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingWriter {
        writes: AtomicUsize,
        records: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl UsageWriter for CountingWriter {
        async fn write_batch(&self, records: &[UsageRecord]) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
        async fn count_since(&self, _scope_id: &str, _since: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    fn sample_record() -> UsageRecord {
        UsageRecord {
            scope_id: "team-1".into(),
            connector_id: "c1".into(),
            endpoint_name: "chat".into(),
            api_key_id: None,
            caller_type: gateway_core::model::CallerType::ApiKey,
            caller_id: "caller".into(),
            method: "POST".into(),
            path: "/chat".into(),
            status_code: 200,
            latency_ms: 10,
            upstream_latency_ms: 8,
            request_bytes: 100,
            response_bytes: 200,
            cached: false,
            error: None,
            region: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn short_lived_mode_writes_immediately() {
        let writer = Arc::new(CountingWriter { writes: AtomicUsize::new(0), records: Mutex::new(vec![]) });
        let sink = UsageSink::new(writer.clone(), SinkMode::ShortLived);
        sink.record(sample_record()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(writer.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn long_lived_mode_buffers_until_flush_size_reached() {
        let writer = Arc::new(CountingWriter { writes: AtomicUsize::new(0), records: Mutex::new(vec![]) });
        let sink = UsageSink::new(writer.clone(), SinkMode::LongLived);
        for _ in 0..FLUSH_SIZE - 1 {
            sink.record(sample_record()).await;
        }
        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
        sink.record(sample_record()).await;
        assert_eq!(writer.writes.load(Ordering::SeqCst), 1);
        assert_eq!(writer.records.lock().unwrap().len(), FLUSH_SIZE);
    }

    #[tokio::test]
    async fn explicit_flush_writes_partial_buffer() {
        let writer = Arc::new(CountingWriter { writes: AtomicUsize::new(0), records: Mutex::new(vec![]) });
        let sink = UsageSink::new(writer.clone(), SinkMode::LongLived);
        sink.record(sample_record()).await;
        sink.flush().await;
        assert_eq!(writer.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_buffer() {
        let writer = Arc::new(CountingWriter { writes: AtomicUsize::new(0), records: Mutex::new(vec![]) });
        let sink = UsageSink::new(writer.clone(), SinkMode::LongLived);
        sink.record(sample_record()).await;
        sink.shutdown().await;
        assert_eq!(writer.records.lock().unwrap().len(), 1);
    }
}
