/// Swipe session state machine
///
/// Sequences permission → batch selection → stack priming → swipe loop →
/// batch completion, and publishes what the UI should render as a polled
/// snapshot plus a stream of events.
///
/// States:
/// - idle → loading → transitioning → idle (stack ready) | noPhotos
/// - on each swipe: idle → transitioning → idle, or → batchComplete for
///   the final card; landing on the final card emits lastPhoto first
/// - permission or enumeration failure → error, until the batch is retried

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::data::{AssetId, StackCard, SwipeDirection};
use super::settings::SessionSettings;
use crate::cache::{ImageLoader, Tier, TieredImageCache};
use crate::error::{Error, Result};
use crate::library::{AssetSource, Permission, PermissionRequest};
use crate::stack::{AdvanceOutcome, Batch, StackManager, StackView};

/// Why the session is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingReason {
    /// Waiting on the library permission gate
    Permission,
    /// Listing the library and drawing a batch
    Batch,
}

/// What the UI should be showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading(LoadingReason),
    /// The stack is being rebuilt; input and layout animation are suspended
    Transitioning,
    /// The top card is the last one in the batch (informational)
    LastPhoto,
    BatchComplete,
    NoPhotos,
    Error(String),
}

/// Pushed to subscribers as the session changes
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    StackChanged { cursor: usize, progress: String },
    Swiped { asset: AssetId, direction: SwipeDirection },
}

/// Everything the UI reads, captured at one instant
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub visible_stack: Vec<StackCard>,
    pub current_index: usize,
    /// "{current_index + 1} of {batch length}"
    pub progress: String,
    pub is_loading: bool,
    pub is_preparing_stack: bool,
    pub state: SessionState,
    pub error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            visible_stack: Vec::new(),
            current_index: 0,
            progress: StackView::default().progress(),
            is_loading: false,
            is_preparing_stack: false,
            state: SessionState::Idle,
            error: None,
        }
    }
}

/// Published snapshot plus the event channel
struct Observers {
    snapshot: RwLock<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl Observers {
    fn new() -> Self {
        let (events, _) = broadcast::channel(100); // Buffer up to 100 events
        Self {
            snapshot: RwLock::new(SessionSnapshot::default()),
            events,
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut snapshot);
    }

    fn emit(&self, event: SessionEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        self.update(|s| {
            s.error = match &state {
                SessionState::Error(message) => Some(message.clone()),
                _ => None,
            };
            s.is_loading = matches!(state, SessionState::Loading(_));
            s.state = state.clone();
        });
        self.emit(SessionEvent::StateChanged(state));
    }

    fn set_stack(&self, view: &StackView) {
        let progress = view.progress();
        self.update(|s| {
            s.visible_stack = view.visible_stack.clone();
            s.current_index = view.cursor;
            s.progress = progress.clone();
            s.is_preparing_stack = view.is_preparing_stack;
        });
        self.emit(SessionEvent::StackChanged {
            cursor: view.cursor,
            progress,
        });
    }
}

/// Owner-context state; only touched with the session lock held
struct SessionCore {
    stack: StackManager,
    source: Arc<dyn AssetSource>,
    batch_size: usize,
    rng: StdRng,
}

/// How long the upgrade watcher backs off while a command holds the stack
const UPGRADE_RETRY: Duration = Duration::from_millis(25);

/// A swipe-to-triage session over one photo library
pub struct SwipeSession {
    core: Arc<Mutex<SessionCore>>,
    observers: Arc<Observers>,
    cache: Arc<TieredImageCache>,
    watcher: Option<JoinHandle<()>>,
}

impl SwipeSession {
    pub fn new(source: Arc<dyn AssetSource>, settings: SessionSettings) -> Result<Self> {
        Self::with_rng(source, settings, StdRng::from_entropy())
    }

    /// Session whose batch sampling is reproducible
    pub fn with_seed(source: Arc<dyn AssetSource>, settings: SessionSettings, seed: u64) -> Result<Self> {
        Self::with_rng(source, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(source: Arc<dyn AssetSource>, settings: SessionSettings, rng: StdRng) -> Result<Self> {
        settings.validate()?;

        let cache = Arc::new(TieredImageCache::new(settings.cache_size_limit));
        let batch_size = settings.batch_size;
        let max_prefetched = settings.max_prefetched_photos;
        let loader = ImageLoader::new(Arc::clone(&cache), Arc::clone(&source), Arc::new(settings));

        let observers = Arc::new(Observers::new());
        let mut stack = StackManager::new(loader, max_prefetched);
        let sink = Arc::clone(&observers);
        stack.set_listener(Arc::new(move |view: &StackView| sink.set_stack(view)));

        let core = Arc::new(Mutex::new(SessionCore {
            stack,
            source,
            batch_size,
            rng,
        }));

        // Without a runtime upgrades still land, but only `refresh_visible` shows them
        let watcher = tokio::runtime::Handle::try_current().ok().map(|handle| {
            handle.spawn(watch_upgrades(
                Arc::downgrade(&core),
                Arc::clone(&cache),
                cache.subscribe_landed(),
            ))
        });

        Ok(Self {
            core,
            observers,
            cache,
            watcher,
        })
    }

    /// Check (and if needed request) library access, then start a batch
    pub async fn request_permission_and_start(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        self.observers
            .set_state(SessionState::Loading(LoadingReason::Permission));

        let granted = match core.source.check_permission().await {
            Permission::NotDetermined => {
                core.source.request_permission().await == PermissionRequest::Granted
            }
            permission => permission.is_granted(),
        };

        if !granted {
            warn!("Photo library access denied");
            return Err(self.fail(Error::PermissionDenied));
        }

        self.prepare_batch_locked(&mut core).await
    }

    /// Draw a new batch from the library and prime its stack. Also the
    /// retry path out of `Error` and `NoPhotos`.
    pub async fn prepare_batch(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        self.prepare_batch_locked(&mut core).await
    }

    /// Throw away the current batch and every cached image, then start over
    pub async fn start_new_batch(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.stack.reset();
        self.prepare_batch_locked(&mut core).await
    }

    async fn prepare_batch_locked(&self, core: &mut SessionCore) -> Result<()> {
        self.observers
            .set_state(SessionState::Loading(LoadingReason::Batch));

        let library = match core.source.list_image_assets().await {
            Ok(library) => library,
            Err(e) => {
                error!(error = %e, "Failed to list library");
                let err = match e {
                    Error::Infrastructure(_) => e,
                    other => Error::Infrastructure(other.to_string()),
                };
                return Err(self.fail(err));
            }
        };

        if library.is_empty() {
            info!("Library is empty");
            core.stack.load_batch(Batch::default());
            self.observers.set_state(SessionState::NoPhotos);
            return Ok(());
        }

        let batch = Batch::sample(&library, core.batch_size, &mut core.rng);
        info!(library = library.len(), batch = batch.len(), "Starting batch");
        core.stack.load_batch(batch);

        self.observers.set_state(SessionState::Transitioning);
        core.stack.prime_initial_stack().await;

        if core.stack.batch().len() == 1 {
            self.observers.set_state(SessionState::LastPhoto);
        }
        self.observers.set_state(SessionState::Idle);
        Ok(())
    }

    /// Swipe the top card. Rejected with `AdvanceInProgress` while a
    /// previous swipe (or any other command) is still running.
    pub async fn advance(&self, direction: SwipeDirection) -> Result<AdvanceOutcome> {
        let mut core = match self.core.try_lock() {
            Ok(core) => core,
            Err(_) => {
                warn!(decision = direction.decision(), "Swipe rejected, stack is busy");
                return Err(Error::AdvanceInProgress);
            }
        };

        let state = self.state();
        if state != SessionState::Idle {
            return Err(Error::InvalidState(format!("cannot swipe while {:?}", state)));
        }

        let top = core
            .stack
            .visible_stack()
            .first()
            .map(|card| card.asset.id.clone())
            .ok_or_else(|| Error::InvalidState("no card to swipe".into()))?;

        self.observers.set_state(SessionState::Transitioning);
        let outcome = core.stack.advance(direction).await?;
        self.observers.emit(SessionEvent::Swiped {
            asset: top,
            direction,
        });

        match outcome {
            AdvanceOutcome::BatchComplete => {
                self.observers.set_state(SessionState::BatchComplete);
            }
            AdvanceOutcome::Advanced { last_photo, .. } => {
                if last_photo {
                    self.observers.set_state(SessionState::LastPhoto);
                }
                self.observers.set_state(SessionState::Idle);
            }
        }
        Ok(outcome)
    }

    /// Swap background upgrades that have landed into the visible cards
    pub async fn refresh_visible(&self) -> usize {
        self.core.lock().await.stack.refresh_visible_images()
    }

    /// Protect an asset the UI is drawing from eviction
    pub fn mark_rendering(&self, id: &AssetId) {
        self.cache.mark_rendering(id);
    }

    pub fn clear_rendering(&self, id: &AssetId) {
        self.cache.clear_rendering(id);
    }

    /// Current observable state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.observers
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.observers
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .state
            .clone()
    }

    /// Event stream; events sent before subscribing are not replayed
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.observers.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<TieredImageCache> {
        &self.cache
    }

    /// Move to the error state and hand the error back for returning
    fn fail(&self, err: Error) -> Error {
        self.observers.set_state(SessionState::Error(err.to_string()));
        err
    }
}

impl Drop for SwipeSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Swap images into the visible stack as their upgrades land, so the
/// snapshot and `StackChanged` events follow without anyone polling.
/// Never waits on the session lock: a swipe must not be turned away
/// because this task is queued for it.
async fn watch_upgrades(
    core: Weak<Mutex<SessionCore>>,
    cache: Arc<TieredImageCache>,
    mut landed: broadcast::Receiver<(AssetId, Tier)>,
) {
    loop {
        match landed.recv().await {
            Ok((id, _)) if !cache.is_visible(&id) => continue,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }

        loop {
            let Some(core) = core.upgrade() else {
                return;
            };
            let refreshed = match core.try_lock() {
                Ok(mut core) => Some(core.stack.refresh_visible_images()),
                Err(_) => None,
            };
            match refreshed {
                Some(changed) => {
                    if changed > 0 {
                        debug!(changed, "Upgraded visible cards");
                    }
                    break;
                }
                None => tokio::time::sleep(UPGRADE_RETRY).await,
            }
        }
    }
}
