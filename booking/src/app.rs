//! Wiring of aggregates, saga, consumers and view.
//!
//! ```text
//! FlightService ─▶ SagaStore ─▶ SlotRepository ──▶ booking-slot-events
//!                                                        │
//!                         slot-to-participant consumer ◀─┘
//!                                    │
//!                     ParticipantSlotRepository ──▶ participant-slot-events
//!                                                        │
//!                      view-participant-slots consumer ◀─┘
//!                                    │
//!                           ParticipantSlotsView
//! ```
//!
//! [`App::start`] subscribes both consumers before returning, so commands
//! sent right afterwards are propagated.

use crate::conditions::ConditionCheck;
use crate::config::Config;
use crate::participant_slot::{
    PARTICIPANT_SLOT_CATEGORY, PARTICIPANT_SLOT_EVENTS_TOPIC, ParticipantSlotReducer,
    ParticipantSlotRepository,
};
use crate::persistence::{PersistenceEnvironment, Undelivered};
use crate::propagation::SlotToParticipantHandler;
use crate::saga::{BookingSagaReducer, BookingSagas, SagaEnvironment};
use crate::service::{FlightService, SagaStore};
use crate::slot::{SLOT_CATEGORY, SLOT_EVENTS_TOPIC, SlotReducer, SlotRepository};
use crate::view::{ParticipantSlotsView, VIEW_NAME, ViewUpdater};
use flightdeck_core::environment::Clock;
use flightdeck_core::event::SerializedEvent;
use flightdeck_core::event_bus::{EventBus, EventBusError};
use flightdeck_core::event_store::EventStore;
use flightdeck_runtime::consumer::IncompleteConsumer;
use flightdeck_runtime::{DeadLetterQueue, EventConsumer, EventHandler, RetryPolicy, Store};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Name of the consumer feeding participant slot aggregates.
pub const PROPAGATION_CONSUMER: &str = "slot-to-participant";

/// External dependencies of the application.
#[derive(Clone)]
pub struct Dependencies {
    /// Event store backing both aggregates
    pub event_store: Arc<dyn EventStore>,
    /// Event bus carrying committed events
    pub event_bus: Arc<dyn EventBus>,
    /// Go/no-go collaborator of the booking saga
    pub condition_check: Arc<dyn ConditionCheck>,
    /// Clock used for slot futurity
    pub clock: Arc<dyn Clock>,
}

/// Why the application failed to start.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A consumer could not subscribe to its topics.
    #[error("Consumer subscription failed: {0}")]
    Subscribe(#[from] EventBusError),

    /// A consumer was built without a required field.
    #[error(transparent)]
    Consumer(#[from] IncompleteConsumer),
}

/// Dead letter queues of a running application.
#[derive(Clone)]
pub struct DeadLetters {
    /// Slot events the propagation consumer could not handle
    pub propagation: DeadLetterQueue<SerializedEvent>,
    /// Participant slot events the view could not apply
    pub view: DeadLetterQueue<SerializedEvent>,
    /// Committed events that could not be published
    pub undelivered: DeadLetterQueue<Undelivered>,
}

/// A running booking application.
pub struct App {
    service: FlightService,
    slots: SlotRepository,
    participants: ParticipantSlotRepository,
    sagas: SagaStore,
    view: Arc<ParticipantSlotsView>,
    event_bus: Arc<dyn EventBus>,
    propagation: Arc<SlotToParticipantHandler>,
    view_updater: Arc<ViewUpdater>,
    retry_policy: RetryPolicy,
    dead_letters: DeadLetters,
    shutdown_tx: broadcast::Sender<()>,
    consumers: Vec<JoinHandle<()>>,
}

impl App {
    /// Build every component and start the consumers.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if a consumer cannot subscribe.
    pub async fn start(config: &Config, deps: Dependencies) -> Result<Self, StartupError> {
        let undelivered = DeadLetterQueue::new(config.consumers.dlq_alert_threshold);
        let persistence = PersistenceEnvironment::new(
            Arc::clone(&deps.event_store),
            Arc::clone(&deps.event_bus),
        )
        .with_undelivered(undelivered.clone());

        let slots = SlotRepository::new(
            SLOT_CATEGORY,
            SlotReducer,
            persistence.clone(),
            Arc::clone(&deps.event_store),
        );
        let participants = ParticipantSlotRepository::new(
            PARTICIPANT_SLOT_CATEGORY,
            ParticipantSlotReducer,
            persistence,
            Arc::clone(&deps.event_store),
        );

        let saga_environment = SagaEnvironment::new(
            Arc::clone(&deps.condition_check),
            Arc::new(slots.clone()),
        )
        .with_check_timeout(config.saga.condition_check_timeout)
        .with_fail_open_on_malformed(config.saga.fail_open_on_malformed);
        let sagas: SagaStore = Store::new(BookingSagas::default(), BookingSagaReducer, saga_environment);

        let view = Arc::new(ParticipantSlotsView::new());
        let propagation = Arc::new(SlotToParticipantHandler::new(participants.clone()));
        let view_updater = Arc::new(ViewUpdater::new(Arc::clone(&view)));

        let retry_policy = config.consumers.retry_policy();
        let (shutdown_tx, _) = broadcast::channel(1);

        let propagation_consumer = EventConsumer::builder()
            .name(PROPAGATION_CONSUMER)
            .topics(vec![SLOT_EVENTS_TOPIC.to_string()])
            .event_bus(Arc::clone(&deps.event_bus))
            .handler(Arc::clone(&propagation) as Arc<dyn EventHandler>)
            .shutdown(shutdown_tx.subscribe())
            .retry_policy(retry_policy.clone())
            .dead_letters(DeadLetterQueue::new(config.consumers.dlq_alert_threshold))
            .reconnect_delay(config.consumers.reconnect_delay)
            .build()?;

        let view_consumer = EventConsumer::builder()
            .name(VIEW_NAME)
            .topics(vec![PARTICIPANT_SLOT_EVENTS_TOPIC.to_string()])
            .event_bus(Arc::clone(&deps.event_bus))
            .handler(Arc::clone(&view_updater) as Arc<dyn EventHandler>)
            .shutdown(shutdown_tx.subscribe())
            .retry_policy(retry_policy.clone())
            .dead_letters(DeadLetterQueue::new(config.consumers.dlq_alert_threshold))
            .reconnect_delay(config.consumers.reconnect_delay)
            .build()?;

        let dead_letters = DeadLetters {
            propagation: propagation_consumer.dead_letters(),
            view: view_consumer.dead_letters(),
            undelivered,
        };

        let consumers = vec![
            propagation_consumer.start().await?,
            view_consumer.start().await?,
        ];
        info!(consumers = consumers.len(), "Event consumers started");

        let service = FlightService::new(
            deps.clock,
            slots.clone(),
            sagas.clone(),
            Arc::clone(&view),
            config.saga.keying,
        );

        Ok(Self {
            service,
            slots,
            participants,
            sagas,
            view,
            event_bus: deps.event_bus,
            propagation,
            view_updater,
            retry_policy,
            dead_letters,
            shutdown_tx,
            consumers,
        })
    }

    /// Boundary operations.
    #[must_use]
    pub fn service(&self) -> FlightService {
        self.service.clone()
    }

    /// Slot aggregates.
    #[must_use]
    pub const fn slots(&self) -> &SlotRepository {
        &self.slots
    }

    /// Participant slot aggregates.
    #[must_use]
    pub const fn participants(&self) -> &ParticipantSlotRepository {
        &self.participants
    }

    /// The materialized view.
    #[must_use]
    pub fn view(&self) -> Arc<ParticipantSlotsView> {
        Arc::clone(&self.view)
    }

    /// Dead letter queues.
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }

    /// Redeliver every parked event and republish undelivered ones.
    ///
    /// Returns how many entries were delivered.
    pub async fn redrive_dead_letters(&self) -> usize {
        let mut delivered = EventConsumer::redrive(
            self.propagation.as_ref(),
            &self.dead_letters.propagation,
            &self.retry_policy,
        )
        .await;
        delivered += EventConsumer::redrive(
            self.view_updater.as_ref(),
            &self.dead_letters.view,
            &self.retry_policy,
        )
        .await;

        for entry in self.dead_letters.undelivered.drain() {
            let Undelivered { topic, event } = entry.payload;
            match self.event_bus.publish(&topic, &event).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    self.dead_letters.undelivered.push(
                        Undelivered { topic, event },
                        error.to_string(),
                        entry.retry_count + 1,
                    );
                },
            }
        }

        info!(delivered, "Dead letters redriven");
        delivered
    }

    /// Stop the consumers and wait for in-flight saga steps.
    pub async fn shutdown(self, timeout: Duration) {
        info!("Shutting down booking application");
        let _ = self.shutdown_tx.send(());

        for (idx, handle) in self.consumers.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(consumer = idx, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = idx, error = %e, "Consumer task failed"),
                Err(_) => warn!(consumer = idx, "Consumer shutdown timed out"),
            }
        }

        if let Err(error) = self.sagas.shutdown(timeout).await {
            warn!(%error, "Saga steps still running at shutdown");
        }
    }
}
