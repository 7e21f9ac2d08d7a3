//! Pull-based Poll Channel.
//!
//! A [`PollChannel`] owns one background task that fetches a status
//! snapshot for a single [`JobKind`] on a timer and delivers every job in
//! it to an [`EventSink`]. The first fetch happens immediately.
//!
//! A snapshot lists every job the backend knows of, finished ones
//! included, so "everything is terminal" alone says nothing about the job
//! just started. The channel keeps a watch list instead: jobs it has seen
//! active in this run plus keys handed to [`PollChannel::watch`]. Once
//! that list is non-empty and every entry has been reported terminal (or
//! has dropped out of the snapshot after being seen), the channel
//! performs one last fetch, delivers it, and exits.
//!
//! [`PollGroup`] keeps one channel per kind so several kinds can be
//! polled at once and restarted independently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trendscope_core::event::{EventSink, ProgressEvent, StatusSnapshot};
use trendscope_core::key::CorrelationKey;
use trendscope_core::phase::JobKind;
use trendscope_core::types::Sequence;

use crate::api::StatusFetcher;

/// Lower bound on the per-request timeout.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(250);

/// Growth factor applied by [`PollInterval::Adaptive`] on quiet ticks.
const ADAPTIVE_GROWTH: f64 = 1.5;

/// How long `stop_all` waits for each channel task to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Interval policy
// ---------------------------------------------------------------------------

/// Time between two fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    Fixed(Duration),
    /// Starts at `min`, backs off towards `max` while snapshots bring
    /// nothing new, and snaps back to `min` on fresh data.
    Adaptive { min: Duration, max: Duration },
}

impl PollInterval {
    /// Interval used for the first wait.
    pub fn initial(&self) -> Duration {
        match *self {
            PollInterval::Fixed(d) => d,
            PollInterval::Adaptive { min, .. } => min,
        }
    }

    /// Interval after a tick; `fresher` is true when the snapshot carried
    /// a newer sequence than any seen before.
    pub fn next(&self, current: Duration, fresher: bool) -> Duration {
        match *self {
            PollInterval::Fixed(d) => d,
            PollInterval::Adaptive { min, .. } if fresher => min,
            PollInterval::Adaptive { min, max } => {
                current.mul_f64(ADAPTIVE_GROWTH).clamp(min, max.max(min))
            }
        }
    }
}

/// Timeout for one fetch: 80% of the current interval, never below 250ms.
pub fn request_timeout(interval: Duration) -> Duration {
    interval.mul_f64(0.8).max(MIN_REQUEST_TIMEOUT)
}

// ---------------------------------------------------------------------------
// Watch list
// ---------------------------------------------------------------------------

/// Jobs a channel must see finish before it may settle.
#[derive(Debug, Default)]
struct Watchlist {
    /// Seen non-terminal in a snapshot of this run.
    active: HashSet<CorrelationKey>,
    /// Handed in by the caller and not yet present in any snapshot.
    awaited: HashSet<CorrelationKey>,
    /// Whether anything was ever watched.
    armed: bool,
    /// Set when the channel has decided to exit; no more keys accepted.
    closed: bool,
}

impl Watchlist {
    fn add(&mut self, key: CorrelationKey) -> bool {
        if self.closed {
            return false;
        }
        self.armed = true;
        self.awaited.insert(key);
        true
    }

    fn observe(&mut self, jobs: &[ProgressEvent]) {
        let present: HashSet<&CorrelationKey> = jobs.iter().map(|job| &job.key).collect();
        self.active.retain(|key| present.contains(key));

        for job in jobs {
            self.awaited.remove(&job.key);
            if job.phase.is_terminal() {
                self.active.remove(&job.key);
            } else {
                self.armed = true;
                self.active.insert(job.key.clone());
            }
        }
    }

    fn settled(&self) -> bool {
        self.armed && self.active.is_empty() && self.awaited.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PollChannel
// ---------------------------------------------------------------------------

/// A running poller for one job kind.
///
/// Dropping the channel cancels its task.
pub struct PollChannel {
    kind: JobKind,
    cancel: CancellationToken,
    watchlist: Arc<Mutex<Watchlist>>,
    task_handle: Option<JoinHandle<()>>,
}

impl PollChannel {
    /// Spawn the polling task. The first fetch happens immediately.
    pub fn start(
        fetcher: Arc<dyn StatusFetcher>,
        kind: JobKind,
        interval: PollInterval,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::start_watching(fetcher, kind, interval, sink, Vec::new())
    }

    /// Like [`PollChannel::start`], with `keys` on the watch list from
    /// the first fetch on.
    pub fn start_watching(
        fetcher: Arc<dyn StatusFetcher>,
        kind: JobKind,
        interval: PollInterval,
        sink: Arc<dyn EventSink>,
        keys: Vec<CorrelationKey>,
    ) -> Self {
        let mut watchlist = Watchlist::default();
        for key in keys {
            watchlist.add(key);
        }
        let watchlist = Arc::new(Mutex::new(watchlist));

        let cancel = CancellationToken::new();
        let poller = Poller {
            fetcher,
            kind,
            interval,
            sink,
            cancel: cancel.clone(),
            watchlist: Arc::clone(&watchlist),
        };
        let task_handle = tokio::spawn(async move { poller.run().await });

        Self {
            kind,
            cancel,
            watchlist,
            task_handle: Some(task_handle),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Keep polling until `key` has been reported terminal.
    ///
    /// Returns `false` if the channel has already stopped or decided to
    /// settle; the caller then needs a fresh channel.
    pub async fn watch(&self, key: CorrelationKey) -> bool {
        if !self.is_running() {
            return false;
        }
        self.watchlist.lock().await.add(key)
    }

    /// Cancel the timer. A fetch already in flight is abandoned and its
    /// result is never delivered.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True until the channel settles or is stopped.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task_handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the polling task to exit.
    pub async fn wait(mut self) {
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(kind = %self.kind, error = %e, "Poll task failed");
            }
        }
    }
}

impl Drop for PollChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// State owned by the polling task.
struct Poller {
    fetcher: Arc<dyn StatusFetcher>,
    kind: JobKind,
    interval: PollInterval,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    watchlist: Arc<Mutex<Watchlist>>,
}

/// What a single tick produced.
enum Tick {
    Failed,
    Delivered {
        snapshot_max: Option<Sequence>,
        settled: bool,
    },
    Cancelled,
}

impl Poller {
    async fn run(self) {
        let mut current = self.interval.initial();
        let mut last_max: Option<Sequence> = None;
        let mut settling = false;

        tracing::info!(
            kind = %self.kind,
            interval_ms = current.as_millis() as u64,
            "Poll channel started",
        );

        loop {
            match self.tick(current).await {
                Tick::Cancelled => {
                    tracing::debug!(kind = %self.kind, "Poll channel stopped");
                    return;
                }
                Tick::Failed => {}
                Tick::Delivered {
                    snapshot_max,
                    settled,
                } => {
                    if settled && settling {
                        if self.close_if_settled().await {
                            break;
                        }
                        settling = false;
                    } else if settled {
                        // Capture whatever transition happened between the
                        // settling snapshot and now.
                        settling = true;
                        continue;
                    } else {
                        settling = false;
                    }
                    let fresher = snapshot_max > last_max;
                    last_max = last_max.max(snapshot_max);
                    current = self.interval.next(current, fresher);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(kind = %self.kind, "Poll channel stopped");
                    return;
                }
                _ = tokio::time::sleep(current) => {}
            }
        }

        tracing::info!(kind = %self.kind, "All watched jobs terminal, poll channel settled");
    }

    /// Close the watch list unless a key arrived since the last tick.
    async fn close_if_settled(&self) -> bool {
        let mut watchlist = self.watchlist.lock().await;
        if watchlist.settled() {
            watchlist.closed = true;
            true
        } else {
            false
        }
    }

    /// Fetch once and deliver the jobs of this channel's kind.
    async fn tick(&self, current: Duration) -> Tick {
        let timeout = request_timeout(current);
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return Tick::Cancelled,
            fetched = tokio::time::timeout(timeout, self.fetcher.fetch_status(self.kind)) => fetched,
        };

        let snapshot = match fetched {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                tracing::warn!(kind = %self.kind, error = %e, "Status poll failed");
                return Tick::Failed;
            }
            Err(_) => {
                tracing::warn!(
                    kind = %self.kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "Status poll timed out",
                );
                return Tick::Failed;
            }
        };

        let snapshot = StatusSnapshot {
            jobs: snapshot
                .jobs
                .into_iter()
                .filter(|job| job.kind() == self.kind)
                .collect(),
        };
        tracing::debug!(kind = %self.kind, jobs = snapshot.jobs.len(), "Status snapshot received");

        let snapshot_max = snapshot.max_sequence();
        let settled = {
            let mut watchlist = self.watchlist.lock().await;
            watchlist.observe(&snapshot.jobs);
            watchlist.settled()
        };

        for job in snapshot.jobs {
            if self.cancel.is_cancelled() {
                return Tick::Cancelled;
            }
            self.sink.deliver(job).await;
        }

        Tick::Delivered {
            snapshot_max,
            settled,
        }
    }
}

// ---------------------------------------------------------------------------
// PollGroup
// ---------------------------------------------------------------------------

/// One Poll Channel per job kind.
pub struct PollGroup {
    fetcher: Arc<dyn StatusFetcher>,
    sink: Arc<dyn EventSink>,
    interval: PollInterval,
    channels: Mutex<HashMap<JobKind, PollChannel>>,
}

impl PollGroup {
    pub fn new(
        fetcher: Arc<dyn StatusFetcher>,
        sink: Arc<dyn EventSink>,
        interval: PollInterval,
    ) -> Self {
        Self {
            fetcher,
            sink,
            interval,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `kind` unless a channel for it is already running.
    ///
    /// Returns `true` when a new channel was started.
    pub async fn ensure_running(&self, kind: JobKind) -> bool {
        let mut channels = self.channels.lock().await;
        if channels.get(&kind).is_some_and(PollChannel::is_running) {
            return false;
        }
        let channel = PollChannel::start(
            Arc::clone(&self.fetcher),
            kind,
            self.interval,
            Arc::clone(&self.sink),
        );
        // Any settled channel previously stored for this kind is dropped here.
        channels.insert(kind, channel);
        true
    }

    /// Make sure `key` is polled until it finishes.
    ///
    /// Adds the key to the running channel for its kind, or starts a new
    /// channel watching it. Returns `true` when a new channel was started.
    pub async fn watch(&self, key: CorrelationKey) -> bool {
        let kind = key.kind();
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&kind) {
            if channel.watch(key.clone()).await {
                return false;
            }
        }
        let channel = PollChannel::start_watching(
            Arc::clone(&self.fetcher),
            kind,
            self.interval,
            Arc::clone(&self.sink),
            vec![key],
        );
        channels.insert(kind, channel);
        true
    }

    /// Stop the channel for `kind`, if any.
    pub async fn stop(&self, kind: JobKind) {
        let channel = self.channels.lock().await.remove(&kind);
        if let Some(channel) = channel {
            channel.stop();
            wait_with_grace(channel).await;
        }
    }

    /// Kinds whose channel is currently polling.
    pub async fn running_kinds(&self) -> Vec<JobKind> {
        let channels = self.channels.lock().await;
        let mut kinds: Vec<JobKind> = channels
            .values()
            .filter(|c| c.is_running())
            .map(PollChannel::kind)
            .collect();
        kinds.sort();
        kinds
    }

    /// Stop every channel and wait for their tasks to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<PollChannel> = self.channels.lock().await.drain().map(|(_, c)| c).collect();
        for channel in &drained {
            channel.stop();
        }
        for channel in drained {
            wait_with_grace(channel).await;
        }
    }
}

async fn wait_with_grace(channel: PollChannel) {
    let kind = channel.kind();
    if tokio::time::timeout(SHUTDOWN_GRACE, channel.wait())
        .await
        .is_err()
    {
        tracing::warn!(kind = %kind, "Poll task did not exit in time");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Notify};
    use trendscope_core::event::ProgressEvent;
    use trendscope_core::key::CorrelationKey;
    use trendscope_core::phase::JobPhase;

    use super::*;
    use crate::error::TransportError;

    enum Step {
        Snapshot(Vec<ProgressEvent>),
        Fail,
        Hang,
    }

    /// Replays a script of responses, then returns empty snapshots.
    struct ScriptedFetcher {
        steps: std::sync::Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
        entered: Notify,
    }

    impl ScriptedFetcher {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: std::sync::Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusFetcher for ScriptedFetcher {
        async fn fetch_status(&self, _kind: JobKind) -> Result<StatusSnapshot, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Snapshot(jobs)) => Ok(StatusSnapshot { jobs }),
                Some(Step::Fail) => Err(TransportError::Server {
                    status: 503,
                    body: "unavailable".into(),
                }),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(StatusSnapshot::default())
                }
                None => Ok(StatusSnapshot::default()),
            }
        }
    }

    fn download(job_id: i64, phase: JobPhase, sequence: u64) -> ProgressEvent {
        ProgressEvent::new(CorrelationKey::bulk(JobKind::BulkDownload, job_id), phase, sequence)
    }

    fn start(
        fetcher: Arc<ScriptedFetcher>,
        interval: PollInterval,
    ) -> (PollChannel, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = PollChannel::start(fetcher, JobKind::BulkDownload, interval, Arc::new(tx));
        (channel, rx)
    }

    fn start_watching(
        fetcher: Arc<ScriptedFetcher>,
        keys: Vec<CorrelationKey>,
    ) -> (PollChannel, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = PollChannel::start_watching(
            fetcher,
            JobKind::BulkDownload,
            PollInterval::Fixed(Duration::from_secs(1)),
            Arc::new(tx),
            keys,
        );
        (channel, rx)
    }

    fn download_key(job_id: i64) -> CorrelationKey {
        CorrelationKey::bulk(JobKind::BulkDownload, job_id)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // -- interval policy --

    #[test]
    fn fixed_interval_never_changes() {
        let interval = PollInterval::Fixed(Duration::from_secs(2));
        assert_eq!(interval.initial(), Duration::from_secs(2));
        assert_eq!(interval.next(Duration::from_secs(2), false), Duration::from_secs(2));
        assert_eq!(interval.next(Duration::from_secs(2), true), Duration::from_secs(2));
    }

    #[test]
    fn adaptive_interval_grows_and_resets() {
        let interval = PollInterval::Adaptive {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        };
        let mut current = interval.initial();
        current = interval.next(current, false);
        assert_eq!(current, Duration::from_secs(3));
        current = interval.next(current, false);
        assert_eq!(current, Duration::from_millis(4500));
        current = interval.next(current, false);
        assert_eq!(current, Duration::from_secs(5));
        current = interval.next(current, true);
        assert_eq!(current, Duration::from_secs(2));
    }

    #[test]
    fn request_timeout_is_shorter_than_interval() {
        assert_eq!(request_timeout(Duration::from_secs(2)), Duration::from_millis(1600));
        assert_eq!(request_timeout(Duration::from_millis(100)), Duration::from_millis(250));
    }

    // -- polling loop --

    #[tokio::test(start_paused = true)]
    async fn settles_after_terminal_snapshot_with_final_fetch() {
        let fetcher = ScriptedFetcher::new(vec![
            Step::Snapshot(vec![download(1, JobPhase::Downloading, 1)]),
            Step::Snapshot(vec![download(1, JobPhase::Completed, 2)]),
            Step::Snapshot(vec![download(1, JobPhase::Completed, 2)]),
        ]);
        let (channel, mut rx) = start(fetcher.clone(), PollInterval::Fixed(Duration::from_secs(1)));

        channel.wait().await;

        assert_eq!(fetcher.calls(), 3);
        let sequences: Vec<u64> = drain(&mut rx).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_snapshot_before_any_job_keeps_polling() {
        let fetcher = ScriptedFetcher::new(vec![
            Step::Snapshot(vec![]),
            Step::Snapshot(vec![]),
            Step::Snapshot(vec![download(7, JobPhase::Queued, 1)]),
            Step::Snapshot(vec![]),
        ]);
        let (channel, mut rx) = start(fetcher.clone(), PollInterval::Fixed(Duration::from_secs(1)));

        channel.wait().await;

        // Fourth snapshot is empty after a job was seen: settle, then one
        // final fetch.
        assert_eq!(fetcher.calls(), 5);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_and_timed_out_polls_are_skipped() {
        let fetcher = ScriptedFetcher::new(vec![
            Step::Fail,
            Step::Hang,
            Step::Snapshot(vec![download(3, JobPhase::Error, 9)]),
        ]);
        let (channel, mut rx) = start_watching(fetcher.clone(), vec![download_key(3)]);

        channel.wait().await;

        assert_eq!(fetcher.calls(), 4);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, JobPhase::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_of_other_kinds_are_filtered_out() {
        let other = ProgressEvent::new(
            CorrelationKey::bulk(JobKind::BulkAnalyze, 1),
            JobPhase::Analyzing,
            4,
        );
        let fetcher = ScriptedFetcher::new(vec![
            Step::Snapshot(vec![other, download(2, JobPhase::Completed, 5)]),
        ]);
        let (channel, mut rx) = start_watching(fetcher, vec![download_key(2)]);

        channel.wait().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), JobKind::BulkDownload);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_history_alone_does_not_settle() {
        let history = || download(5, JobPhase::Completed, 40);
        let fetcher = ScriptedFetcher::new(vec![
            Step::Snapshot(vec![history()]),
            Step::Snapshot(vec![history()]),
            Step::Snapshot(vec![history(), download(6, JobPhase::Downloading, 1)]),
            Step::Snapshot(vec![history(), download(6, JobPhase::Completed, 2)]),
        ]);
        let (channel, mut rx) = start(fetcher.clone(), PollInterval::Fixed(Duration::from_secs(1)));

        channel.wait().await;

        assert_eq!(fetcher.calls(), 5);
        let new_job: Vec<JobPhase> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.key == download_key(6))
            .map(|e| e.phase)
            .collect();
        assert_eq!(new_job, vec![JobPhase::Downloading, JobPhase::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn watched_key_keeps_polling_until_it_appears_terminal() {
        let fetcher = ScriptedFetcher::new(vec![
            Step::Snapshot(vec![download(5, JobPhase::Completed, 40)]),
            Step::Snapshot(vec![download(5, JobPhase::Completed, 40)]),
            Step::Snapshot(vec![download(6, JobPhase::Completed, 3)]),
        ]);
        let (channel, mut rx) = start_watching(fetcher.clone(), vec![download_key(6)]);

        channel.wait().await;

        assert_eq!(fetcher.calls(), 4);
        assert!(drain(&mut rx).iter().any(|e| e.key == download_key(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_result() {
        let fetcher = ScriptedFetcher::new(vec![Step::Hang]);
        let (channel, mut rx) = start(fetcher.clone(), PollInterval::Fixed(Duration::from_secs(1)));

        fetcher.entered.notified().await;
        assert!(channel.is_running());
        channel.stop();
        assert!(!channel.is_running());
        channel.wait().await;

        assert_eq!(fetcher.calls(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    // -- group --

    #[tokio::test(start_paused = true)]
    async fn group_runs_one_channel_per_kind() {
        let fetcher = ScriptedFetcher::new(vec![Step::Hang, Step::Hang]);
        let (tx, _rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let group = PollGroup::new(fetcher, Arc::new(tx), PollInterval::Fixed(Duration::from_secs(1)));

        assert!(group.ensure_running(JobKind::BulkDownload).await);
        assert!(!group.ensure_running(JobKind::BulkDownload).await);
        assert!(group.ensure_running(JobKind::DiscoveryScan).await);
        assert_eq!(
            group.running_kinds().await,
            vec![JobKind::DiscoveryScan, JobKind::BulkDownload]
        );

        group.stop(JobKind::DiscoveryScan).await;
        assert_eq!(group.running_kinds().await, vec![JobKind::BulkDownload]);

        group.stop_all().await;
        assert!(group.running_kinds().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn group_adds_watched_keys_to_the_running_channel() {
        let fetcher = ScriptedFetcher::new(vec![Step::Hang]);
        let (tx, _rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let group = PollGroup::new(fetcher, Arc::new(tx), PollInterval::Fixed(Duration::from_secs(1)));

        assert!(group.watch(download_key(1)).await);
        assert!(!group.watch(download_key(2)).await);
        assert!(!group.ensure_running(JobKind::BulkDownload).await);
        assert_eq!(group.running_kinds().await, vec![JobKind::BulkDownload]);

        group.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn group_replaces_a_settled_channel_on_watch() {
        let fetcher = ScriptedFetcher::new(vec![Step::Snapshot(vec![download(1, JobPhase::Completed, 2)])]);
        let (tx, _rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let group = PollGroup::new(
            fetcher.clone(),
            Arc::new(tx),
            PollInterval::Fixed(Duration::from_secs(1)),
        );

        assert!(group.watch(download_key(1)).await);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(group.running_kinds().await.is_empty());
        assert_eq!(fetcher.calls(), 2);

        assert!(group.watch(download_key(2)).await);
        assert_eq!(group.running_kinds().await, vec![JobKind::BulkDownload]);
        group.stop_all().await;
    }
}
