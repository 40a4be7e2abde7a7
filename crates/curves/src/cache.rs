use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use stackconfig::CurveSettings;
use tracing::{debug, info, warn};

use crate::client::{CurveService, RetryPolicy};
use crate::queue::{FetchPool, QueueState};
use crate::store::{DurableStore, StoreError};
use crate::texture::{decode_data_url, decode_image, encode_data_url, TextureHandle};
use crate::CurveId;

/// Monotonic request number; the highest ticket a requester issued wins.
pub type Ticket = u64;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Decoded textures kept in memory.
    pub memory_entries: usize,
    pub prefetch_radius: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            retry: RetryPolicy::default(),
            memory_entries: 256,
            prefetch_radius: 5,
        }
    }
}

impl CacheSettings {
    pub fn from_config(settings: &CurveSettings) -> Self {
        Self {
            max_in_flight: settings.max_in_flight,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                backoff: settings.backoff,
            },
            memory_entries: settings.memory_entries,
            prefetch_radius: settings.prefetch_radius,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CurveRequest {
    /// Served from memory or the durable store; no fetch was started.
    Ready(TextureHandle),
    /// A fetch is queued or running; the result arrives as a delivery.
    Pending(Ticket),
}

/// Outcome of a queued request. `texture` is `None` when the fetch failed.
#[derive(Debug, Clone)]
pub struct CurveDelivery {
    pub ticket: Ticket,
    pub id: CurveId,
    pub texture: Option<TextureHandle>,
}

/// Cache-first curve lookup backed by a bounded fetch pool.
///
/// Cloning is cheap; clones share every layer.
#[derive(Clone)]
pub struct CurveCache {
    shared: Arc<Shared>,
}

struct Shared {
    service: Arc<dyn CurveService>,
    store: Mutex<Box<dyn DurableStore>>,
    memory: Mutex<MemoryLayer>,
    waiting: Mutex<HashMap<CurveId, Vec<Waiter>>>,
    pool: FetchPool,
    retry: RetryPolicy,
    prefetch_radius: u32,
    tickets: AtomicU64,
    /// Ids installed by the latest random batch, in service order.
    swatch: Mutex<Vec<CurveId>>,
}

struct Waiter {
    ticket: Ticket,
    tx: Sender<CurveDelivery>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decoded textures, bounded by entry count with least-recently-used eviction.
struct MemoryLayer {
    entries: HashMap<CurveId, (TextureHandle, u64)>,
    clock: u64,
    capacity: usize,
}

impl MemoryLayer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, id: CurveId) -> Option<TextureHandle> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&id).map(|(texture, last_used)| {
            *last_used = clock;
            Arc::clone(texture)
        })
    }

    fn contains(&self, id: CurveId) -> bool {
        self.entries.contains_key(&id)
    }

    fn insert(&mut self, id: CurveId, texture: TextureHandle) {
        self.clock += 1;
        self.entries.insert(id, (texture, self.clock));
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl CurveCache {
    pub fn new(
        service: Arc<dyn CurveService>,
        store: Box<dyn DurableStore>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                store: Mutex::new(store),
                memory: Mutex::new(MemoryLayer::new(settings.memory_entries)),
                waiting: Mutex::new(HashMap::new()),
                pool: FetchPool::new(settings.max_in_flight),
                retry: settings.retry,
                prefetch_radius: settings.prefetch_radius,
                tickets: AtomicU64::new(1),
                swatch: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A consumer handle with its own delivery channel.
    pub fn requester(&self) -> CurveRequester {
        let (tx, rx) = unbounded();
        CurveRequester {
            cache: self.clone(),
            tx,
            rx,
            latest: None,
        }
    }

    /// Memory first, then the durable store. Never touches the network.
    pub fn lookup(&self, id: CurveId) -> Option<TextureHandle> {
        self.shared.lookup(id)
    }

    /// Warms the cache with the ids around `center`.
    pub fn prefetch(&self, center: CurveId) {
        for id in center.neighbours(self.shared.prefetch_radius) {
            if self.shared.is_cached(id) {
                continue;
            }
            let start = {
                let mut waiting = lock(&self.shared.waiting);
                if waiting.contains_key(&id) {
                    false
                } else {
                    waiting.insert(id, Vec::new());
                    true
                }
            };
            if start {
                debug!(%id, "prefetching curve");
                Shared::spawn_fetch(&self.shared, id);
            }
        }
    }

    /// Fills the cache from the batch endpoint in the background.
    pub fn fetch_random_batch(&self, count: usize) {
        let shared = Arc::clone(&self.shared);
        self.shared.pool.submit(move || {
            let batch = match shared.service.fetch_batch(count) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "curve batch request failed");
                    return;
                }
            };
            let installed: Vec<CurveId> = batch
                .into_iter()
                .filter(|curve| shared.install(curve.id, &curve.bytes).is_some())
                .map(|curve| curve.id)
                .collect();
            info!(stored = installed.len(), requested = count, "cached curve batch");
            *lock(&shared.swatch) = installed;
        });
    }

    /// Ids from the latest random batch, available for quick selection.
    pub fn swatch(&self) -> Vec<CurveId> {
        lock(&self.shared.swatch).clone()
    }

    /// Ids present in the durable store.
    pub fn cached_ids(&self) -> Vec<CurveId> {
        let mut ids: Vec<CurveId> = lock(&self.shared.store)
            .keys()
            .iter()
            .filter_map(|key| CurveId::from_store_key(key))
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        lock(&self.shared.memory).entries.clear();
        lock(&self.shared.store).clear()
    }

    /// State of the fetch pool. Retries waiting out a backoff hold no slot
    /// and are not counted.
    pub fn queue_state(&self) -> QueueState {
        self.shared.pool.state()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.pool.in_flight()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.shared.pool.peak_in_flight()
    }

    fn next_ticket(&self) -> Ticket {
        self.shared.tickets.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue(&self, id: CurveId, waiter: Waiter) {
        let start = {
            let mut waiting = lock(&self.shared.waiting);
            // A fetch for this id may have finished since the caller's lookup.
            if let Some(texture) = lock(&self.shared.memory).get(id) {
                let _ = waiter.tx.send(CurveDelivery {
                    ticket: waiter.ticket,
                    id,
                    texture: Some(texture),
                });
                return;
            }
            match waiting.get_mut(&id) {
                Some(waiters) => {
                    debug!(%id, "joining in-flight curve request");
                    waiters.push(waiter);
                    false
                }
                None => {
                    waiting.insert(id, vec![waiter]);
                    true
                }
            }
        };
        if start {
            Shared::spawn_fetch(&self.shared, id);
        }
    }
}

impl Shared {
    fn lookup(&self, id: CurveId) -> Option<TextureHandle> {
        if let Some(texture) = lock(&self.memory).get(id) {
            debug!(%id, "curve served from memory");
            return Some(texture);
        }

        let key = id.store_key();
        let stored = match lock(&self.store).get(&key) {
            Ok(stored) => stored?,
            Err(err) => {
                warn!(%id, error = %err, "failed to read cached curve");
                return None;
            }
        };
        let decoded = decode_data_url(&stored)
            .and_then(|bytes| decode_image(&bytes, format!("curve {id}")));
        match decoded {
            Ok(image) => {
                debug!(%id, "curve served from store");
                let texture = Arc::new(image);
                lock(&self.memory).insert(id, Arc::clone(&texture));
                Some(texture)
            }
            Err(err) => {
                warn!(%id, error = %err, "cached curve is corrupt; discarding");
                if let Err(err) = lock(&self.store).remove(&key) {
                    warn!(%id, error = %err, "failed to discard corrupt curve");
                }
                None
            }
        }
    }

    fn is_cached(&self, id: CurveId) -> bool {
        lock(&self.memory).contains(id) || lock(&self.store).contains(&id.store_key())
    }

    fn spawn_fetch(shared: &Arc<Shared>, id: CurveId) {
        Shared::spawn_attempt(shared, id, 1);
    }

    fn spawn_attempt(shared: &Arc<Shared>, id: CurveId, attempt: u32) {
        let worker = Arc::clone(shared);
        shared.pool.submit(move || match worker.service.fetch_curve(id) {
            Ok(bytes) => {
                let texture = worker.install(id, &bytes);
                worker.resolve(id, texture);
            }
            Err(err) => match worker.retry.backoff_after(attempt, &err) {
                Some(delay) => Shared::retry_later(&worker, id, attempt, delay),
                None => {
                    warn!(%id, attempt, error = %err, "curve fetch failed");
                    worker.resolve(id, None);
                }
            },
        });
    }

    /// Waits out a rate-limit backoff outside the pool so the slot serves
    /// other requests meanwhile, then queues the next attempt.
    fn retry_later(shared: &Arc<Shared>, id: CurveId, attempt: u32, delay: Duration) {
        debug!(%id, attempt, ?delay, "curve service rate limited; backing off");
        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("curve-backoff".into())
            .spawn(move || {
                thread::sleep(delay);
                Shared::spawn_attempt(&worker, id, attempt + 1);
            });
        if let Err(err) = spawned {
            warn!(%id, error = %err, "failed to schedule curve retry");
            shared.resolve(id, None);
        }
    }

    /// Decodes fetched bytes and writes them to both layers.
    fn install(&self, id: CurveId, bytes: &[u8]) -> Option<TextureHandle> {
        let image = match decode_image(bytes, format!("curve {id}")) {
            Ok(image) => image,
            Err(err) => {
                warn!(%id, error = %err, "fetched curve is not a decodable image");
                return None;
            }
        };
        let texture = Arc::new(image);
        if let Err(err) = lock(&self.store).put(&id.store_key(), &encode_data_url(bytes)) {
            warn!(%id, error = %err, "could not persist curve; keeping it in memory only");
        }
        lock(&self.memory).insert(id, Arc::clone(&texture));
        Some(texture)
    }

    fn resolve(&self, id: CurveId, texture: Option<TextureHandle>) {
        let waiters = lock(&self.waiting).remove(&id).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.tx.send(CurveDelivery {
                ticket: waiter.ticket,
                id,
                texture: texture.clone(),
            });
        }
    }
}

/// Per-consumer view of the cache. Only the most recent request is ever
/// surfaced by `poll`; deliveries for superseded tickets are dropped.
pub struct CurveRequester {
    cache: CurveCache,
    tx: Sender<CurveDelivery>,
    rx: Receiver<CurveDelivery>,
    latest: Option<Ticket>,
}

impl CurveRequester {
    pub fn request(&mut self, id: CurveId) -> CurveRequest {
        let ticket = self.cache.next_ticket();
        self.latest = Some(ticket);
        if let Some(texture) = self.cache.lookup(id) {
            return CurveRequest::Ready(texture);
        }
        self.cache.enqueue(
            id,
            Waiter {
                ticket,
                tx: self.tx.clone(),
            },
        );
        CurveRequest::Pending(ticket)
    }

    /// Drains the delivery channel, returning the delivery for the latest
    /// ticket if it has arrived.
    pub fn poll(&mut self) -> Option<CurveDelivery> {
        let mut current = None;
        for delivery in self.rx.try_iter() {
            if Some(delivery.ticket) == self.latest {
                current = Some(delivery);
            } else {
                debug!(id = %delivery.id, ticket = delivery.ticket, "dropping superseded curve");
            }
        }
        current
    }

    /// The curve in swatch `slot` (0-based), if the batch filled it.
    pub fn swatch_id(&self, slot: usize) -> Option<CurveId> {
        lock(&self.cache.shared.swatch).get(slot).copied()
    }

    pub fn latest(&self) -> Option<Ticket> {
        self.latest
    }

    pub fn prefetch(&self, center: CurveId) {
        self.cache.prefetch(center);
    }

    pub fn cache(&self) -> &CurveCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::client::{BatchCurve, FetchError};
    use crate::store::MemoryStore;
    use crate::texture::tests::gradient_png;

    /// Counts calls and concurrency; optional scripted failures per id.
    #[derive(Default)]
    struct FakeService {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay: Duration,
        script: Mutex<HashMap<u32, VecDeque<FetchError>>>,
    }

    impl FakeService {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn fail(&self, id: u32, errors: Vec<FetchError>) {
            lock(&self.script).insert(id, errors.into());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CurveService for FakeService {
        fn fetch_curve(&self, id: CurveId) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            if let Some(err) = lock(&self.script)
                .get_mut(&id.get())
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            Ok(gradient_png(8, (id.get() % 200) as u8))
        }

        fn fetch_batch(&self, count: usize) -> Result<Vec<BatchCurve>, FetchError> {
            Ok((0..count as u32)
                .map(|offset| BatchCurve {
                    id: CurveId(500 + offset),
                    bytes: gradient_png(4, offset as u8),
                })
                .collect())
        }
    }

    fn fast_settings() -> CacheSettings {
        CacheSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            ..CacheSettings::default()
        }
    }

    fn cache_with(service: Arc<FakeService>, capacity: u64) -> CurveCache {
        CurveCache::new(service, Box::new(MemoryStore::new(capacity)), fast_settings())
    }

    fn wait_for(requester: &mut CurveRequester) -> CurveDelivery {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(delivery) = requester.poll() {
                return delivery;
            }
            assert!(Instant::now() < deadline, "timed out waiting for delivery");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_idle(cache: &CurveCache) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.queue_state() != QueueState::Idle {
            assert!(Instant::now() < deadline, "pool never drained");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn second_request_is_served_without_network() {
        let service = Arc::new(FakeService::default());
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut requester = cache.requester();

        let CurveRequest::Pending(ticket) = requester.request(CurveId(3)) else {
            panic!("first request must go to the network");
        };
        let delivery = wait_for(&mut requester);
        assert_eq!(delivery.ticket, ticket);
        assert!(delivery.texture.is_some());

        match requester.request(CurveId(3)) {
            CurveRequest::Ready(texture) => assert_eq!(texture.width, 8),
            CurveRequest::Pending(_) => panic!("cached curve must be ready"),
        }
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn durable_store_survives_a_fresh_memory_layer() {
        let temp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeService::default());
        {
            let store = crate::DiskStore::open(temp.path(), 1 << 20).unwrap();
            let cache = CurveCache::new(service.clone(), Box::new(store), fast_settings());
            let mut requester = cache.requester();
            requester.request(CurveId(9));
            assert!(wait_for(&mut requester).texture.is_some());
        }

        let store = crate::DiskStore::open(temp.path(), 1 << 20).unwrap();
        let cache = CurveCache::new(service.clone(), Box::new(store), fast_settings());
        assert!(matches!(
            cache.requester().request(CurveId(9)),
            CurveRequest::Ready(_)
        ));
        assert_eq!(cache.cached_ids(), vec![CurveId(9)]);
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn concurrency_is_bounded_at_five() {
        let service = Arc::new(FakeService::with_delay(Duration::from_millis(20)));
        let cache = cache_with(Arc::clone(&service), 1 << 24);
        let mut requesters: Vec<CurveRequester> = (0..20).map(|_| cache.requester()).collect();
        for (index, requester) in requesters.iter_mut().enumerate() {
            requester.request(CurveId(index as u32 + 1));
        }
        for requester in &mut requesters {
            assert!(wait_for(requester).texture.is_some());
        }
        assert_eq!(service.calls(), 20);
        assert!(service.max_running.load(Ordering::SeqCst) <= 5);
        assert!(cache.peak_in_flight() <= 5);
    }

    #[test]
    fn concurrent_misses_share_one_fetch() {
        let service = Arc::new(FakeService::with_delay(Duration::from_millis(30)));
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut first = cache.requester();
        let mut second = cache.requester();
        first.request(CurveId(4));
        second.request(CurveId(4));
        assert!(wait_for(&mut first).texture.is_some());
        assert!(wait_for(&mut second).texture.is_some());
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn latest_request_wins() {
        let service = Arc::new(FakeService::with_delay(Duration::from_millis(10)));
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut requester = cache.requester();
        requester.request(CurveId(1));
        let CurveRequest::Pending(latest) = requester.request(CurveId(2)) else {
            panic!("expected pending");
        };
        wait_idle(&cache);
        let delivery = wait_for(&mut requester);
        assert_eq!(delivery.ticket, latest);
        assert_eq!(delivery.id, CurveId(2));
        assert!(requester.poll().is_none());
    }

    #[test]
    fn ready_result_supersedes_pending_fetch() {
        let service = Arc::new(FakeService::with_delay(Duration::from_millis(10)));
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut warm = cache.requester();
        warm.request(CurveId(7));
        wait_for(&mut warm);

        let mut requester = cache.requester();
        requester.request(CurveId(8));
        assert!(matches!(requester.request(CurveId(7)), CurveRequest::Ready(_)));
        wait_idle(&cache);
        assert!(requester.poll().is_none());
    }

    #[test]
    fn rate_limited_fetch_is_retried() {
        let service = Arc::new(FakeService::default());
        service.fail(6, vec![FetchError::RateLimited, FetchError::RateLimited]);
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut requester = cache.requester();
        requester.request(CurveId(6));
        assert!(wait_for(&mut requester).texture.is_some());
        assert_eq!(service.calls(), 3);
    }

    #[test]
    fn backoff_frees_the_slot_for_other_curves() {
        let service = Arc::new(FakeService::default());
        service.fail(6, vec![FetchError::RateLimited]);
        let settings = CacheSettings {
            max_in_flight: 1,
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(1),
            },
            ..CacheSettings::default()
        };
        let cache = CurveCache::new(service.clone(), Box::new(MemoryStore::new(1 << 20)), settings);
        let mut limited = cache.requester();
        let mut other = cache.requester();
        limited.request(CurveId(6));
        // Let the first attempt hit the rate limit before queueing the next id.
        let deadline = Instant::now() + Duration::from_secs(10);
        while service.calls() == 0 {
            assert!(Instant::now() < deadline, "first attempt never ran");
            thread::sleep(Duration::from_millis(1));
        }
        other.request(CurveId(7));

        let started = Instant::now();
        assert!(wait_for(&mut other).texture.is_some());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(limited.poll().is_none(), "retry must still be backing off");

        assert!(wait_for(&mut limited).texture.is_some());
        assert_eq!(service.calls(), 3);
    }

    #[test]
    fn exhausted_retries_resolve_to_no_texture() {
        let service = Arc::new(FakeService::default());
        service.fail(
            6,
            vec![
                FetchError::RateLimited,
                FetchError::RateLimited,
                FetchError::RateLimited,
            ],
        );
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut requester = cache.requester();
        requester.request(CurveId(6));
        assert!(wait_for(&mut requester).texture.is_none());
        assert_eq!(service.calls(), 3);
    }

    #[test]
    fn other_failures_are_not_retried() {
        let service = Arc::new(FakeService::default());
        service.fail(2, vec![FetchError::Status(500)]);
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        let mut requester = cache.requester();
        requester.request(CurveId(2));
        assert!(wait_for(&mut requester).texture.is_none());
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn store_quota_failure_still_delivers() {
        let service = Arc::new(FakeService::default());
        let cache = cache_with(Arc::clone(&service), 4);
        let mut requester = cache.requester();
        requester.request(CurveId(5));
        assert!(wait_for(&mut requester).texture.is_some());
        assert!(cache.cached_ids().is_empty());
        assert!(matches!(requester.request(CurveId(5)), CurveRequest::Ready(_)));
    }

    #[test]
    fn corrupt_store_entry_is_refetched() {
        let service = Arc::new(FakeService::default());
        let mut store = MemoryStore::new(1 << 20);
        store
            .put(&CurveId(11).store_key(), "data:image/png;base64,AAAA")
            .unwrap();
        let cache = CurveCache::new(service.clone(), Box::new(store), fast_settings());
        let mut requester = cache.requester();
        assert!(matches!(
            requester.request(CurveId(11)),
            CurveRequest::Pending(_)
        ));
        assert!(wait_for(&mut requester).texture.is_some());
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn prefetch_warms_neighbours_once() {
        let service = Arc::new(FakeService::default());
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        cache.prefetch(CurveId(10));
        wait_idle(&cache);
        assert_eq!(service.calls(), 10);
        assert!(cache.lookup(CurveId(15)).is_some());
        assert!(cache.lookup(CurveId(5)).is_some());
        assert!(cache.lookup(CurveId(10)).is_none());

        cache.prefetch(CurveId(10));
        wait_idle(&cache);
        assert_eq!(service.calls(), 10);
    }

    #[test]
    fn batch_fills_cache() {
        let service = Arc::new(FakeService::default());
        let cache = cache_with(Arc::clone(&service), 1 << 20);
        cache.fetch_random_batch(3);
        wait_idle(&cache);
        assert_eq!(
            cache.cached_ids(),
            vec![CurveId(500), CurveId(501), CurveId(502)]
        );
        assert_eq!(cache.swatch(), vec![CurveId(500), CurveId(501), CurveId(502)]);

        let mut requester = cache.requester();
        let picked = requester.swatch_id(1).unwrap();
        assert_eq!(picked, CurveId(501));
        assert!(matches!(requester.request(picked), CurveRequest::Ready(_)));
        assert!(requester.swatch_id(3).is_none());
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn memory_layer_evicts_oldest() {
        let mut layer = MemoryLayer::new(2);
        let texture = Arc::new(crate::TextureImage::from_rgba(1, 1, vec![0; 4], "t"));
        layer.insert(CurveId(1), Arc::clone(&texture));
        layer.insert(CurveId(2), Arc::clone(&texture));
        assert!(layer.get(CurveId(1)).is_some());
        layer.insert(CurveId(3), texture);
        assert!(layer.contains(CurveId(1)));
        assert!(!layer.contains(CurveId(2)));
        assert!(layer.contains(CurveId(3)));
    }
}
