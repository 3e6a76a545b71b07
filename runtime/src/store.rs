//! The store: owns one reducer's state and runs the effects it returns.
//!
//! ```text
//! send(action) ──▶ reducer (state write lock) ──▶ effects spawned
//!                                                    │
//!                     broadcast ◀── action produced ─┘
//!                         │
//!                         └──▶ send(action)   feedback loop
//! ```
//!
//! Callers that need the result of a command subscribe to the broadcast
//! through [`Store::send_and_wait_for`].

use crate::StoreError;
use flightdeck_core::effect::Effect;
use flightdeck_core::reducer::Reducer;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

/// Capacity of the action broadcast used by [`Store::new`].
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Counts the running effects of one group and signals when it drops to zero.
#[derive(Clone)]
struct EffectGroup {
    running: Arc<AtomicUsize>,
    idle: Arc<watch::Sender<()>>,
}

impl EffectGroup {
    fn new() -> (Self, watch::Receiver<()>) {
        let (idle, rx) = watch::channel(());
        let group = Self {
            running: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(idle),
        };
        (group, rx)
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    async fn until_idle(&self, rx: &mut watch::Receiver<()>) {
        while self.running() > 0 {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Releases a spawned effect from its group and from the store total,
/// including when the effect panics.
struct RunningEffect {
    group: EffectGroup,
    store_total: Arc<AtomicUsize>,
}

impl RunningEffect {
    fn enter(group: &EffectGroup, store_total: &Arc<AtomicUsize>) -> Self {
        group.running.fetch_add(1, Ordering::SeqCst);
        store_total.fetch_add(1, Ordering::SeqCst);
        Self {
            group: group.clone(),
            store_total: Arc::clone(store_total),
        }
    }
}

impl Drop for RunningEffect {
    fn drop(&mut self) {
        self.store_total.fetch_sub(1, Ordering::SeqCst);
        if self.group.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.group.idle.send(());
        }
    }
}

/// Waits for the effects started by one [`Store::send`].
///
/// Actions fed back by those effects start effects of their own, which this
/// handle does not cover.
pub struct EffectHandle {
    group: EffectGroup,
    idle: watch::Receiver<()>,
}

impl EffectHandle {
    /// Wait until the effects have finished.
    pub async fn wait(&mut self) {
        self.group.until_idle(&mut self.idle).await;
    }

    /// [`EffectHandle::wait`] bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Timeout`] if effects are still running afterwards.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("running", &self.group.running())
            .finish_non_exhaustive()
    }
}

/// Runtime for one reducer. Clones share state, environment and broadcast.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    closed: Arc<AtomicBool>,
    running: Arc<AtomicUsize>,
    actions: broadcast::Sender<A>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            closed: Arc::clone(&self.closed),
            running: Arc::clone(&self.running),
            actions: self.actions.clone(),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a store holding `initial_state`.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a store whose action broadcast keeps `capacity` actions.
    ///
    /// Observers that fall further behind skip ahead.
    #[must_use]
    pub fn with_broadcast_capacity(initial_state: S, reducer: R, environment: E, capacity: usize) -> Self {
        let (actions, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            closed: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicUsize::new(0)),
            actions,
        }
    }

    /// Run the reducer for `action` and start the effects it returns.
    ///
    /// Returns once the effects are started.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] after [`Store::shutdown`] was called.
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            metrics::counter!("store.actions.refused").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        let effects = {
            let mut state = self.state.write().await;
            let started = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut state, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds").record(started.elapsed().as_secs_f64());
            effects
        };
        metrics::counter!("store.actions").increment(1);

        let (group, idle) = EffectGroup::new();
        for effect in effects {
            self.run(effect, &group);
        }
        Ok(EffectHandle { group, idle })
    }

    /// Send `action`, then wait for the first produced action that satisfies
    /// `predicate`.
    ///
    /// The subscription is taken before sending, so an immediate answer is
    /// not missed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Timeout`] when nothing matched in time,
    /// [`StoreError::ChannelClosed`] if the broadcast closed, and the errors of
    /// [`Store::send`].
    pub async fn send_and_wait_for<F>(&self, action: A, predicate: F, timeout: Duration) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut observed = self.actions.subscribe();
        self.send(action).await?;

        let wait = async {
            loop {
                match observed.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer fell behind");
                    },
                    Err(broadcast::error::RecvError::Closed) => return Err(StoreError::ChannelClosed),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Every action produced by an effect, from now on.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.actions.subscribe()
    }

    /// Read the state through `f`.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(&*self.state.read().await)
    }

    /// Effects running across every send.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Refuse new actions, then wait up to `timeout` for running effects.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] with the number of effects still running.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        tracing::info!(pending = self.pending_effects(), "Store shutting down");

        let drained = tokio::time::timeout(timeout, async {
            while self.pending_effects() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => Ok(()),
            Err(_) => {
                let pending = self.pending_effects();
                metrics::counter!("store.shutdown.timeout").increment(1);
                tracing::error!(pending, "Store shutdown timed out");
                Err(StoreError::ShutdownTimeout(pending))
            },
        }
    }

    /// Broadcast `action` and feed it back through the reducer.
    async fn feed_back(&self, action: A) {
        let _ = self.actions.send(action.clone());
        if let Err(error) = self.send(action).await {
            tracing::debug!(%error, "Produced action dropped");
        }
    }

    fn spawn<F>(&self, group: &EffectGroup, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let running = RunningEffect::enter(group, &self.running);
        tokio::spawn(async move {
            let _running = running;
            task.await;
        });
    }

    fn run(&self, effect: Effect<A>, group: &EffectGroup) {
        match effect {
            Effect::None => {},
            Effect::Future(future) => {
                let store = self.clone();
                self.spawn(group, async move {
                    if let Some(action) = future.await {
                        store.feed_back(action).await;
                    }
                });
            },
            Effect::Delay { duration, action } => {
                let store = self.clone();
                self.spawn(group, async move {
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action).await;
                });
            },
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.run(effect, group);
                }
            },
            Effect::Sequential(effects) => {
                let store = self.clone();
                self.spawn(group, async move {
                    for effect in effects {
                        let (step, mut idle) = EffectGroup::new();
                        store.run(effect, &step);
                        step.until_idle(&mut idle).await;
                    }
                });
            },
        }
    }
}
