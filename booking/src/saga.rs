//! Flight booking saga.
//!
//! ```text
//! Start ─▶ AwaitingConditionCheck ──report ok────▶ Booking ──▶ Resolved(Booked | Rejected)
//!                    │            └─report not ok─▶ Resolved(Skipped)
//!                    └─timeout / unavailable──────▶ Failed
//! ```
//!
//! A saga is identified by its key (see [`SagaKeying`]). Starting a key that
//! already has a saga does nothing, whatever stage it is in. The condition
//! check runs on an effect, so the saga holds no lock on the slot while it
//! waits.

use crate::conditions::{ConditionCheck, ConditionCheckError, ConditionsReport};
use crate::slot::{SlotAction, SlotError, SlotRepository};
use async_trait::async_trait;
use flightdeck_core::effect::Effect;
use flightdeck_core::reducer::Reducer;
use flightdeck_core::{SmallVec, smallvec};
use flightdeck_runtime::RepositoryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Participants and id of a requested booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// Student id
    pub student_id: String,
    /// Aircraft id
    pub aircraft_id: String,
    /// Instructor id
    pub instructor_id: String,
    /// Caller-chosen booking id
    pub booking_id: String,
}

/// How saga keys are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SagaKeying {
    /// One saga per booking id within a slot; a new booking id can retry a slot.
    #[default]
    PerBooking,
    /// One saga per slot, ever.
    PerSlot,
}

impl SagaKeying {
    /// Saga key for a booking request.
    ///
    /// Booking ids are only unique within a slot, so per-booking keys carry
    /// the slot id too.
    #[must_use]
    pub fn key(self, slot_id: &str, request: &BookingRequest) -> String {
        match self {
            Self::PerBooking => format!("{slot_id}-{}", request.booking_id),
            Self::PerSlot => slot_id.to_string(),
        }
    }
}

/// Unknown saga keying name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown saga keying '{0}', expected 'per_booking' or 'per_slot'")]
pub struct UnknownSagaKeying(String);

impl FromStr for SagaKeying {
    type Err = UnknownSagaKeying;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_booking" => Ok(Self::PerBooking),
            "per_slot" => Ok(Self::PerSlot),
            _ => Err(UnknownSagaKeying(s.to_string())),
        }
    }
}

/// How a saga ended without failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", content = "reason", rename_all = "snake_case")]
pub enum Resolution {
    /// The reservation was booked.
    Booked,
    /// Conditions did not meet the minimums; nothing was booked.
    Skipped,
    /// The slot refused the reservation.
    Rejected(String),
}

impl Resolution {
    const fn label(&self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Skipped => "skipped",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Where a saga is in its pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum BookingStage {
    /// Waiting for the condition check.
    AwaitingConditionCheck,
    /// Conditions passed; the reservation was sent to the slot.
    Booking,
    /// Finished.
    Resolved(Resolution),
    /// A step failed; nothing was booked.
    Failed(String),
}

impl BookingStage {
    /// Whether the saga will take no further steps.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Failed(_))
    }
}

impl fmt::Display for BookingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingConditionCheck => f.write_str("awaiting condition check"),
            Self::Booking => f.write_str("booking"),
            Self::Resolved(resolution) => write!(f, "resolved ({})", resolution.label()),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// State of one saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightBooking {
    /// Saga key
    pub key: String,
    /// Slot being booked
    pub slot_id: String,
    /// The request the saga was started with
    pub request: BookingRequest,
    /// Report returned by the condition check
    pub condition_report: Option<ConditionsReport>,
    /// Current stage
    pub stage: BookingStage,
}

/// Every saga, by key.
#[derive(Debug, Clone, Default)]
pub struct BookingSagas {
    bookings: HashMap<String, FlightBooking>,
}

impl BookingSagas {
    /// Saga stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FlightBooking> {
        self.bookings.get(key)
    }

    /// Number of sagas ever started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    /// Whether no saga was started yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

/// Saga inputs and step results.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaAction {
    /// Start a saga; ignored if `key` already has one.
    Start {
        /// Saga key
        key: String,
        /// Slot to book
        slot_id: String,
        /// Booking request
        request: BookingRequest,
    },
    /// The condition check produced a report.
    ConditionsChecked {
        /// Saga key
        key: String,
        /// Report
        report: ConditionsReport,
    },
    /// The condition check timed out or failed.
    ConditionCheckFailed {
        /// Saga key
        key: String,
        /// Failure description
        reason: String,
    },
    /// The slot accepted the reservation.
    ReservationBooked {
        /// Saga key
        key: String,
    },
    /// The slot refused the reservation.
    ReservationRejected {
        /// Saga key
        key: String,
        /// Rejection from the slot
        reason: String,
    },
    /// The reservation could not be stored.
    ReservationFailed {
        /// Saga key
        key: String,
        /// Failure description
        reason: String,
    },
}

impl SagaAction {
    /// Key of the saga the action belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Start { key, .. }
            | Self::ConditionsChecked { key, .. }
            | Self::ConditionCheckFailed { key, .. }
            | Self::ReservationBooked { key }
            | Self::ReservationRejected { key, .. }
            | Self::ReservationFailed { key, .. } => key,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Why the slot did not take a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The slot refused it.
    #[error(transparent)]
    Rejected(SlotError),
    /// The command could not be carried out.
    #[error("{0}")]
    Failed(String),
}

/// Books reservations on slots.
#[async_trait]
pub trait ReservationBook: Send + Sync {
    /// Book `request` on `slot_id`.
    ///
    /// # Errors
    ///
    /// [`ReservationError::Rejected`] when the slot refuses the booking,
    /// [`ReservationError::Failed`] when it could not be stored.
    async fn book(&self, slot_id: &str, request: &BookingRequest) -> Result<(), ReservationError>;
}

#[async_trait]
impl ReservationBook for SlotRepository {
    async fn book(&self, slot_id: &str, request: &BookingRequest) -> Result<(), ReservationError> {
        let command = SlotAction::BookReservation {
            slot_id: slot_id.to_string(),
            student_id: request.student_id.clone(),
            aircraft_id: request.aircraft_id.clone(),
            instructor_id: request.instructor_id.clone(),
            booking_id: request.booking_id.clone(),
        };

        match self.execute(slot_id, command).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::Rejected(rejection)) => Err(ReservationError::Rejected(rejection)),
            Err(other) => Err(ReservationError::Failed(other.to_string())),
        }
    }
}

/// Dependencies of [`BookingSagaReducer`].
#[derive(Clone)]
pub struct SagaEnvironment {
    /// External go/no-go check
    pub condition_check: Arc<dyn ConditionCheck>,
    /// Where reservations are booked
    pub reservations: Arc<dyn ReservationBook>,
    /// Bound on the condition check
    pub check_timeout: Duration,
    /// Treat a malformed report as favourable
    pub fail_open_on_malformed: bool,
}

impl SagaEnvironment {
    /// Environment with a 30 second check bound and fail-open enabled.
    #[must_use]
    pub fn new(
        condition_check: Arc<dyn ConditionCheck>,
        reservations: Arc<dyn ReservationBook>,
    ) -> Self {
        Self {
            condition_check,
            reservations,
            check_timeout: Duration::from_secs(30),
            fail_open_on_malformed: true,
        }
    }

    /// Replace the condition check bound.
    #[must_use]
    pub const fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Enable or disable the malformed report fallback.
    #[must_use]
    pub const fn with_fail_open_on_malformed(mut self, enabled: bool) -> Self {
        self.fail_open_on_malformed = enabled;
        self
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer driving every booking saga.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingSagaReducer;

impl BookingSagaReducer {
    fn check_conditions(key: String, slot_id: String, env: &SagaEnvironment) -> Effect<SagaAction> {
        let check = Arc::clone(&env.condition_check);
        let timeout = env.check_timeout;
        let fail_open = env.fail_open_on_malformed;

        Effect::Future(Box::pin(async move {
            let result = tokio::time::timeout(timeout, check.check(&slot_id)).await;

            let action = match result {
                Ok(Ok(report)) => SagaAction::ConditionsChecked { key, report },
                Ok(Err(ConditionCheckError::Malformed(detail))) if fail_open => {
                    tracing::warn!(
                        saga_key = %key,
                        slot_id = %slot_id,
                        %detail,
                        "Malformed condition report, assuming favourable conditions"
                    );
                    metrics::counter!("saga.fail_open").increment(1);
                    SagaAction::ConditionsChecked {
                        key,
                        report: ConditionsReport::permissive(slot_id),
                    }
                },
                Ok(Err(error)) => SagaAction::ConditionCheckFailed {
                    key,
                    reason: error.to_string(),
                },
                Err(_) => SagaAction::ConditionCheckFailed {
                    key,
                    reason: format!("condition check timed out after {}s", timeout.as_secs_f64()),
                },
            };
            Some(action)
        }))
    }

    fn book(key: String, slot_id: String, request: BookingRequest, env: &SagaEnvironment) -> Effect<SagaAction> {
        let reservations = Arc::clone(&env.reservations);

        Effect::Future(Box::pin(async move {
            let action = match reservations.book(&slot_id, &request).await {
                Ok(()) => SagaAction::ReservationBooked { key },
                Err(ReservationError::Rejected(rejection)) => SagaAction::ReservationRejected {
                    key,
                    reason: rejection.to_string(),
                },
                Err(ReservationError::Failed(reason)) => SagaAction::ReservationFailed { key, reason },
            };
            Some(action)
        }))
    }

    fn resolve(booking: &mut FlightBooking, resolution: Resolution) {
        tracing::info!(
            saga_key = %booking.key,
            slot_id = %booking.slot_id,
            booking_id = %booking.request.booking_id,
            resolution = resolution.label(),
            "Booking saga resolved"
        );
        metrics::counter!("saga.resolved", "resolution" => resolution.label()).increment(1);
        booking.stage = BookingStage::Resolved(resolution);
    }

    fn fail(booking: &mut FlightBooking, reason: String) {
        tracing::error!(
            saga_key = %booking.key,
            slot_id = %booking.slot_id,
            %reason,
            "Booking saga step failed"
        );
        metrics::counter!("saga.failed").increment(1);
        booking.stage = BookingStage::Failed(reason);
    }
}

impl Reducer for BookingSagaReducer {
    type State = BookingSagas;
    type Action = SagaAction;
    type Environment = SagaEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if let SagaAction::Start { key, slot_id, request } = action {
            if let Some(existing) = state.bookings.get(&key) {
                tracing::info!(saga_key = %key, stage = %existing.stage, "Saga already started, ignoring");
                return SmallVec::new();
            }

            tracing::info!(saga_key = %key, slot_id = %slot_id, booking_id = %request.booking_id, "Booking saga started");
            metrics::counter!("saga.started").increment(1);

            state.bookings.insert(
                key.clone(),
                FlightBooking {
                    key: key.clone(),
                    slot_id: slot_id.clone(),
                    request,
                    condition_report: None,
                    stage: BookingStage::AwaitingConditionCheck,
                },
            );
            return smallvec![Self::check_conditions(key, slot_id, env)];
        }

        let Some(booking) = state.bookings.get_mut(action.key()) else {
            tracing::warn!(saga_key = action.key(), "Step result for unknown saga");
            return SmallVec::new();
        };

        match (booking.stage.clone(), action) {
            (BookingStage::AwaitingConditionCheck, SagaAction::ConditionsChecked { report, .. }) => {
                let meets_requirements = report.meets_requirements;
                booking.condition_report = Some(report);

                if meets_requirements {
                    booking.stage = BookingStage::Booking;
                    smallvec![Self::book(
                        booking.key.clone(),
                        booking.slot_id.clone(),
                        booking.request.clone(),
                        env,
                    )]
                } else {
                    Self::resolve(booking, Resolution::Skipped);
                    SmallVec::new()
                }
            },
            (BookingStage::AwaitingConditionCheck, SagaAction::ConditionCheckFailed { reason, .. })
            | (BookingStage::Booking, SagaAction::ReservationFailed { reason, .. }) => {
                Self::fail(booking, reason);
                SmallVec::new()
            },
            (BookingStage::Booking, SagaAction::ReservationBooked { .. }) => {
                Self::resolve(booking, Resolution::Booked);
                SmallVec::new()
            },
            (BookingStage::Booking, SagaAction::ReservationRejected { reason, .. }) => {
                Self::resolve(booking, Resolution::Rejected(reason));
                SmallVec::new()
            },
            (stage, action) => {
                tracing::debug!(saga_key = %booking.key, %stage, ?action, "Step result ignored in current stage");
                SmallVec::new()
            },
        }
    }
}
