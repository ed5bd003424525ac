// SPDX-License-Identifier: Apache-2.0

//! Buffer between the source runners and the entry sink.
//!
//! Entries from every source accumulate here and go to the sink in bulk
//! when the buffer reaches `batch_size` or its oldest entry has waited
//! `batch_timeout`. A rejected bulk insert is retried row by row so one bad
//! row does not cost the whole batch. When no row at all can be written the
//! sink is treated as unavailable: the rows are kept, flushing pauses for one
//! `batch_timeout`, and producers wait once the buffer reaches its high-water
//! mark instead of retrying against the sink themselves.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::select;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::sink::{EntryRecord, EntrySink, EventSink, IngestEvent};
use crate::source::SourceId;

/// Pending entries beyond this many batches are flushed inline by the
/// producer, or make it wait while the sink is unavailable
const HIGH_WATER_BATCHES: usize = 10;

/// Outcome of one or more flushes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub attempted: usize,
    pub inserted: usize,
    /// Rows the sink already had
    pub duplicates: usize,
    /// Rows the sink rejected individually; these are dropped
    pub failed: usize,
    /// Rows kept in the buffer because the sink was unavailable
    pub requeued: usize,
    /// Bulk inserts that fell back to per-row inserts
    pub bulk_failures: usize,
}

impl FlushStats {
    fn merge(&mut self, other: &FlushStats) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.bulk_failures += other.bulk_failures;
    }
}

struct Pending {
    items: Vec<EntryRecord>,
    max_size: usize,
    batch_timeout: Duration,
    /// When the oldest pending item arrived
    oldest: Option<Instant>,
    /// Set while the sink is unavailable; no flush is due before it
    retry_at: Option<Instant>,
}

impl Pending {
    fn backing_off(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }

    fn should_flush(&self, now: Instant) -> bool {
        if self.backing_off(now) {
            return false;
        }
        match self.oldest {
            Some(oldest) => {
                self.items.len() >= self.max_size || oldest + self.batch_timeout <= now
            }
            None => false,
        }
    }

    fn time_until_due(&self, now: Instant) -> Duration {
        if let Some(at) = self.retry_at.filter(|_| self.backing_off(now)) {
            return at.saturating_duration_since(now);
        }
        match self.oldest {
            Some(_) if self.items.len() >= self.max_size => Duration::ZERO,
            Some(oldest) => (oldest + self.batch_timeout).saturating_duration_since(now),
            None => self.batch_timeout,
        }
    }

    fn take_batch(&mut self) -> Vec<EntryRecord> {
        self.oldest = None;
        std::mem::take(&mut self.items)
    }

    fn high_water(&self) -> usize {
        self.max_size.saturating_mul(HIGH_WATER_BATCHES)
    }

    fn overflowing(&self) -> bool {
        self.items.len() >= self.high_water()
    }
}

pub struct BatchBuffer {
    sink: Arc<dyn EntrySink>,
    events: Arc<dyn EventSink>,
    pending: Mutex<Pending>,
    flush_lock: tokio::sync::Mutex<()>,
    full: Notify,
    /// Signalled after a flush that reached the sink
    drained: Notify,
    totals: Mutex<FlushStats>,
}

impl BatchBuffer {
    pub fn new(
        sink: Arc<dyn EntrySink>,
        events: Arc<dyn EventSink>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        let max_size = batch_size.max(1);
        Self {
            sink,
            events,
            pending: Mutex::new(Pending {
                items: Vec::with_capacity(max_size),
                max_size,
                batch_timeout,
                oldest: None,
                retry_at: None,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
            full: Notify::new(),
            drained: Notify::new(),
            totals: Mutex::new(FlushStats::default()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_limits(&self, batch_size: usize, batch_timeout: Duration) {
        let mut pending = self.pending();
        pending.max_size = batch_size.max(1);
        pending.batch_timeout = batch_timeout;
    }

    /// Add an entry. Wakes the flusher once a full batch is pending and
    /// flushes inline when the buffer runs far ahead of the sink. While the
    /// sink is unavailable and the buffer is at its high-water mark this
    /// waits until a flush gets through.
    pub async fn push(&self, record: EntryRecord) {
        self.wait_for_room().await;

        let (full, overflowing) = {
            let mut pending = self.pending();
            if pending.oldest.is_none() {
                pending.oldest = Some(Instant::now());
            }
            pending.items.push(record);
            (pending.items.len() >= pending.max_size, pending.overflowing())
        };

        if full {
            self.full.notify_one();
        }
        if overflowing {
            self.flush_overflow().await;
        }
    }

    async fn wait_for_room(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            {
                let pending = self.pending();
                if pending.retry_at.is_none() || !pending.overflowing() {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Inline flush by a producer, skipped if another flush already made
    /// room or the sink is known to be unavailable
    async fn flush_overflow(&self) {
        let _guard = self.flush_lock.lock().await;
        {
            let pending = self.pending();
            if !pending.overflowing() || pending.retry_at.is_some() {
                return;
            }
        }
        if let Err(e) = self.flush_pending().await {
            warn!(error = %e, "Inline flush of a full entry buffer failed");
        }
    }

    pub fn len(&self) -> usize {
        self.pending().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.pending().should_flush(now)
    }

    /// Totals over every flush so far
    pub fn totals(&self) -> FlushStats {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write everything pending to the sink. Concurrent calls are serialized,
    /// so once this returns every entry pushed before the call has been
    /// handled. Returns an error if the sink was unavailable; the affected
    /// entries stay buffered.
    pub async fn flush(&self) -> Result<FlushStats> {
        let _guard = self.flush_lock.lock().await;
        self.flush_pending().await
    }

    /// Caller holds `flush_lock`
    async fn flush_pending(&self) -> Result<FlushStats> {
        let (batch, max_size) = {
            let mut pending = self.pending();
            (pending.take_batch(), pending.max_size)
        };
        if batch.is_empty() {
            return Ok(FlushStats::default());
        }

        let mut stats = FlushStats::default();
        let mut unavailable = None;
        let mut retained = Vec::new();
        for chunk in batch.chunks(max_size) {
            if unavailable.is_some() {
                retained.extend_from_slice(chunk);
                continue;
            }
            stats.attempted += chunk.len();
            if let Err(e) = self.insert_chunk(chunk, &mut stats, &mut retained).await {
                unavailable = Some(e);
            }
        }
        stats.requeued = retained.len();
        self.requeue(retained, unavailable.is_some());

        debug!(
            attempted = stats.attempted,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            failed = stats.failed,
            "Flushed entry batch"
        );
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(&stats);

        match unavailable {
            Some(e) => Err(e),
            None => {
                self.drained.notify_waiters();
                Ok(stats)
            }
        }
    }

    /// Insert one chunk. When the sink takes none of its rows they are moved
    /// to `retained` and the sink is reported unavailable.
    async fn insert_chunk(
        &self,
        chunk: &[EntryRecord],
        stats: &mut FlushStats,
        retained: &mut Vec<EntryRecord>,
    ) -> Result<()> {
        match self.sink.insert_batch(chunk).await {
            Ok(inserted) => {
                stats.inserted += inserted.len();
                stats.duplicates += chunk.len() - inserted.len();
                self.publish(inserted);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, rows = chunk.len(), "Bulk insert failed, retrying row by row");
                stats.bulk_failures += 1;
            }
        }

        let mut inserted = Vec::new();
        let mut duplicates = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for record in chunk {
            match self.sink.insert_batch(std::slice::from_ref(record)).await {
                Ok(rows) if rows.is_empty() => {
                    debug!(
                        source = %record.source_id,
                        key = record.dedup_key.as_str(),
                        "Skipping duplicate entry"
                    );
                    duplicates += 1;
                }
                Ok(rows) => inserted.extend(rows),
                Err(e) => {
                    failed.push(record.clone());
                    last_error = Some(e);
                }
            }
        }

        stats.inserted += inserted.len();
        stats.duplicates += duplicates;
        self.publish(inserted);

        let Some(e) = last_error else {
            return Ok(());
        };
        if failed.len() == chunk.len() {
            // nothing got through, keep the rows for the next flush
            retained.append(&mut failed);
            return Err(Error::Sink(format!("entry sink unavailable: {}", e)));
        }

        for record in &failed {
            warn!(
                source = %record.source_id,
                file = %record.file_path.display(),
                line = record.entry.line_number,
                error = %e,
                "Dropping entry the sink rejected"
            );
        }
        stats.failed += failed.len();
        Ok(())
    }

    /// Put rows back at the front of the buffer. An unavailable sink pauses
    /// flushing for one batch timeout.
    fn requeue(&self, mut rows: Vec<EntryRecord>, unavailable: bool) {
        let mut pending = self.pending();
        if !unavailable {
            pending.retry_at = None;
            return;
        }

        let now = Instant::now();
        pending.retry_at = Some(now + pending.batch_timeout);
        rows.append(&mut pending.items);
        pending.items = rows;
        if !pending.items.is_empty() {
            pending.oldest = Some(now);
        }
        if pending.overflowing() {
            error!(
                pending = pending.items.len(),
                "Entry sink unavailable and the buffer is full, producers will wait"
            );
        }
    }

    fn publish(&self, inserted: Vec<EntryRecord>) {
        if inserted.is_empty() {
            return;
        }
        let mut by_source: BTreeMap<SourceId, Vec<EntryRecord>> = BTreeMap::new();
        for record in inserted {
            by_source
                .entry(record.source_id.clone())
                .or_default()
                .push(record);
        }
        for (source_id, records) in by_source {
            self.events
                .publish(IngestEvent::EntriesInserted { source_id, records });
        }
    }

    /// Flush whenever a batch is full or has timed out, until cancelled.
    /// Entries still pending at cancellation are left for the final
    /// checkpoint.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let wait = self.pending().time_until_due(Instant::now());
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = self.full.notified() => {},
                _ = tokio::time::sleep(wait) => {},
            }

            if self.is_due(Instant::now()) {
                if let Err(e) = self.flush().await {
                    warn!(error = %e, pending = self.len(), "Failed to flush entries");
                }
            }
        }
        debug!("Entry batch flusher exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ParsedLogEntry, Severity};
    use crate::sink::{BroadcastEventSink, MemoryEntrySink, NoopEventSink};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(source: &str, message: &str) -> EntryRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        EntryRecord::new(
            SourceId::new(source),
            PathBuf::from("/logs/a.log"),
            ParsedLogEntry::new(ts, Severity::Info, message),
        )
    }

    /// Rejects multi-row inserts and any row whose message contains "bad"
    #[derive(Default)]
    struct PickySink {
        inner: MemoryEntrySink,
    }

    #[async_trait]
    impl EntrySink for PickySink {
        async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>> {
            if records.len() > 1 {
                return Err(Error::Sink("bulk rejected".to_string()));
            }
            if records.iter().any(|r| r.entry.message.contains("bad")) {
                return Err(Error::Sink("constraint violation".to_string()));
            }
            self.inner.insert_batch(records).await
        }
    }

    #[derive(Default)]
    struct FlakySink {
        down: AtomicBool,
        inner: MemoryEntrySink,
    }

    #[async_trait]
    impl EntrySink for FlakySink {
        async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::Sink("connection refused".to_string()));
            }
            self.inner.insert_batch(records).await
        }
    }

    /// Counts every call, fails them all while down
    #[derive(Default)]
    struct CountingSink {
        calls: std::sync::atomic::AtomicUsize,
        down: AtomicBool,
        inner: MemoryEntrySink,
    }

    impl CountingSink {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EntrySink for CountingSink {
        async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::Sink("connection refused".to_string()));
            }
            self.inner.insert_batch(records).await
        }
    }

    fn buffer(sink: Arc<dyn EntrySink>, size: usize) -> BatchBuffer {
        BatchBuffer::new(sink, Arc::new(NoopEventSink), size, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_flush_inserts_and_counts_duplicates() {
        let sink = Arc::new(MemoryEntrySink::new());
        let buffer = buffer(sink.clone(), 10);

        buffer.push(record("jf", "one")).await;
        buffer.push(record("jf", "two")).await;
        buffer.push(record("jf", "one")).await;
        assert_eq!(buffer.len(), 3);

        let stats = buffer.flush().await.unwrap();
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.duplicates, 1);
        assert!(buffer.is_empty());
        assert_eq!(sink.len(), 2);

        // empty flush is a no-op
        assert_eq!(buffer.flush().await.unwrap(), FlushStats::default());
    }

    #[tokio::test]
    async fn test_row_fallback_drops_only_bad_rows() {
        let sink = Arc::new(PickySink::default());
        sink.inner.insert_batch(&[record("jf", "old")]).await.unwrap();
        let buffer = buffer(sink.clone(), 10);

        for message in ["good one", "bad one", "old", "good two"] {
            buffer.push(record("jf", message)).await;
        }

        let stats = buffer.flush().await.unwrap();
        assert_eq!(stats.bulk_failures, 1);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 1);
        assert!(buffer.is_empty());
        assert_eq!(sink.inner.len(), 3);
        assert_eq!(buffer.totals().failed, 1);
    }

    #[tokio::test]
    async fn test_unavailable_sink_keeps_entries() {
        let sink = Arc::new(FlakySink::default());
        sink.down.store(true, Ordering::SeqCst);
        let buffer = buffer(sink.clone(), 10);

        buffer.push(record("jf", "one")).await;
        buffer.push(record("jf", "two")).await;

        assert!(buffer.flush().await.is_err());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.totals().requeued, 2);

        sink.down.store(false, Ordering::SeqCst);
        let stats = buffer.flush().await.unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(sink.inner.len(), 2);
    }

    #[tokio::test]
    async fn test_full_buffer_waits_for_sink_instead_of_dropping() {
        let sink = Arc::new(CountingSink::default());
        sink.down.store(true, Ordering::SeqCst);
        let buffer = Arc::new(buffer(sink.clone(), 10));

        // the push that reaches the high-water mark tries the sink once:
        // one bulk insert, then the first chunk row by row
        for i in 0..100 {
            buffer.push(record("jf", &format!("line {}", i))).await;
        }
        assert_eq!(sink.calls(), 11);
        assert_eq!(buffer.len(), 100);

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                for i in 100..110 {
                    buffer.push(record("jf", &format!("line {}", i))).await;
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!producer.is_finished());
        assert_eq!(sink.calls(), 11);
        assert_eq!(buffer.len(), 100);

        sink.down.store(false, Ordering::SeqCst);
        let stats = buffer.flush().await.unwrap();
        assert_eq!(stats.inserted, 100);

        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .unwrap()
            .unwrap();
        buffer.flush().await.unwrap();

        assert_eq!(sink.inner.len(), 110);
        assert_eq!(buffer.totals().failed, 0);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_backs_off_while_sink_is_down() {
        let sink = Arc::new(CountingSink::default());
        sink.down.store(true, Ordering::SeqCst);
        let buffer = Arc::new(BatchBuffer::new(
            sink.clone(),
            Arc::new(NoopEventSink),
            2,
            Duration::from_secs(1),
        ));
        let cancel = CancellationToken::new();
        let flusher = tokio::spawn(buffer.clone().run(cancel.clone()));

        buffer.push(record("jf", "one")).await;
        buffer.push(record("jf", "two")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // one bulk insert plus two rows
        assert_eq!(sink.calls(), 3);

        // more full batches do not retry before the timeout
        buffer.push(record("jf", "three")).await;
        buffer.push(record("jf", "four")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.calls(), 3);
        assert_eq!(buffer.len(), 4);

        sink.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.inner.len(), 4);
        assert!(buffer.is_empty());

        cancel.cancel();
        flusher.await.unwrap();
    }

    #[tokio::test]
    async fn test_publishes_inserted_per_source() {
        let events = Arc::new(BroadcastEventSink::new(16));
        let mut rx = events.subscribe();
        let buffer = BatchBuffer::new(
            Arc::new(MemoryEntrySink::new()),
            events.clone(),
            10,
            Duration::from_secs(60),
        );

        buffer.push(record("arr", "a")).await;
        buffer.push(record("jf", "b")).await;
        buffer.push(record("arr", "c")).await;
        buffer.flush().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                IngestEvent::EntriesInserted { source_id, records } => {
                    seen.push((source_id.to_string(), records.len()))
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(seen, vec![("arr".to_string(), 2), ("jf".to_string(), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_on_size_or_timeout() {
        let buffer = BatchBuffer::new(
            Arc::new(MemoryEntrySink::new()),
            Arc::new(NoopEventSink),
            2,
            Duration::from_millis(500),
        );
        assert!(!buffer.is_due(Instant::now()));

        buffer.push(record("jf", "one")).await;
        assert!(!buffer.is_due(Instant::now()));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(buffer.is_due(Instant::now()));

        buffer.flush().await.unwrap();
        buffer.push(record("jf", "two")).await;
        buffer.push(record("jf", "three")).await;
        assert!(buffer.is_due(Instant::now()));
    }

    #[tokio::test]
    async fn test_flusher_writes_full_batches() {
        let sink = Arc::new(MemoryEntrySink::new());
        let buffer = Arc::new(BatchBuffer::new(
            sink.clone(),
            Arc::new(NoopEventSink),
            2,
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();
        let flusher = tokio::spawn(buffer.clone().run(cancel.clone()));

        buffer.push(record("jf", "one")).await;
        buffer.push(record("jf", "two")).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        flusher.await.unwrap();
    }
}
