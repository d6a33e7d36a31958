//! Mock location sampler for testing

use async_trait::async_trait;
use carga_api::TrackingSample;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    LocationSampler, PositionOptions, SamplerError, SamplerResult, Watch, WatchBackend,
    WatchEvent, WatchHandle,
};

/// Mock sampler for unit/integration testing.
///
/// One-shot reads return queued results first, then the current fix.
/// Watches are driven by [`MockSampler::push_sample`].
pub struct MockSampler {
    next_id: AtomicU64,
    fix: Arc<Mutex<Option<TrackingSample>>>,
    queued: Arc<Mutex<VecDeque<SamplerResult<TrackingSample>>>>,
    watchers: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<WatchEvent>>>>,
    watch_calls: AtomicUsize,
    unwatch_calls: AtomicUsize,
    current_delay: Mutex<Option<Duration>>,
    watch_delay: Mutex<Option<Duration>>,

    /// Configure every one-shot read to fail
    pub fail_current: Arc<Mutex<Option<SamplerError>>>,

    /// Configure watch to fail
    pub fail_watch: Arc<Mutex<Option<SamplerError>>>,
}

impl MockSampler {
    /// A sampler with no fix; one-shot reads fail until one is set
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fix: Arc::new(Mutex::new(None)),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            watchers: Arc::new(Mutex::new(HashMap::new())),
            watch_calls: AtomicUsize::new(0),
            unwatch_calls: AtomicUsize::new(0),
            current_delay: Mutex::new(None),
            watch_delay: Mutex::new(None),
            fail_current: Arc::new(Mutex::new(None)),
            fail_watch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_fix(sample: TrackingSample) -> Self {
        let sampler = Self::new();
        sampler.set_fix(sample);
        sampler
    }

    /// Replace the fix returned by one-shot reads
    pub fn set_fix(&self, sample: TrackingSample) {
        *self.fix.lock().unwrap() = Some(sample);
    }

    /// Queue a result for the next one-shot read
    pub fn queue_result(&self, result: SamplerResult<TrackingSample>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn set_fail_current(&self, error: Option<SamplerError>) {
        *self.fail_current.lock().unwrap() = error;
    }

    /// Make every one-shot read wait before answering, like a cold GPS
    pub fn set_current_delay(&self, delay: Option<Duration>) {
        *self.current_delay.lock().unwrap() = delay;
    }

    pub fn set_watch_delay(&self, delay: Option<Duration>) {
        *self.watch_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_watch(&self, error: Option<SamplerError>) {
        *self.fail_watch.lock().unwrap() = error;
    }

    /// Deliver a fix to every open watch. Returns how many received it.
    pub fn push_sample(&self, sample: TrackingSample) -> usize {
        self.broadcast(WatchEvent::Sample(sample))
    }

    /// Deliver a sensor failure to every open watch
    pub fn push_error(&self, error: SamplerError) -> usize {
        self.broadcast(WatchEvent::Error(error))
    }

    fn broadcast(&self, event: WatchEvent) -> usize {
        let watchers = self.watchers.lock().unwrap();
        watchers
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Number of `watch` calls, including failed ones
    pub fn watch_count(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Number of `unwatch` calls, including repeated ones
    pub fn unwatch_count(&self) -> usize {
        self.unwatch_calls.load(Ordering::SeqCst)
    }

    /// Watches that have not been released
    pub fn active_watches(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }
}

impl Default for MockSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSampler for MockSampler {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn current_location(&self, _options: PositionOptions) -> SamplerResult<TrackingSample> {
        let delay = *self.current_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.queued.lock().unwrap().pop_front() {
            return result;
        }

        if let Some(error) = self.fail_current.lock().unwrap().clone() {
            return Err(error);
        }

        let fix = *self.fix.lock().unwrap();
        fix.ok_or_else(|| SamplerError::PositionUnavailable("mock has no fix".into()))
    }

    async fn watch(&self, _options: PositionOptions) -> SamplerResult<Watch> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.watch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fail_watch.lock().unwrap().clone() {
            return Err(error);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().unwrap().insert(id, tx);

        Ok(Watch {
            handle: WatchHandle::new(id, WatchBackend::Mock),
            events: rx,
        })
    }

    fn unwatch(&self, handle: &WatchHandle) {
        self.unwatch_calls.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender closes the receiver side
        self.watchers.lock().unwrap().remove(&handle.id());
    }
}
