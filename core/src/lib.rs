//! # Flightdeck Core
//!
//! Core traits and types shared by the flightdeck booking services.
//!
//! Business logic is written as reducers: pure functions of
//! `(State, Action, Environment) → (State, Effects)`. Effects are descriptions of
//! work (async calls, delays) that the runtime executes, feeding any resulting
//! action back into the reducer.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for one aggregate or workflow
//! - **Action**: Every input to a reducer (commands, events, command outcomes)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect description, executed by `flightdeck-runtime`
//! - **Environment**: Injected dependencies (clock, event store, collaborators)
//!
//! ## Example
//!
//! ```ignore
//! use flightdeck_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for SlotReducer {
//!     type State = Timeslot;
//!     type Action = SlotAction;
//!     type Environment = SlotEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Timeslot,
//!         action: SlotAction,
//!         env: &SlotEnvironment,
//!     ) -> SmallVec<[Effect<SlotAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Event trait and serialized event wire format
pub mod event;

/// Event bus abstraction (publish/subscribe)
pub mod event_bus;

/// Event store abstraction (append-only streams)
pub mod event_store;

/// Read model projections
pub mod projection;

/// Stream identifiers and versions
pub mod stream;

/// The reducer trait.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Business logic of one aggregate or workflow.
    ///
    /// `reduce` mutates the state in place and describes follow-up work as
    /// effects; it performs no I/O itself. Anything nondeterministic (time,
    /// collaborators, storage) comes in through the environment.
    pub trait Reducer {
        /// State owned by the store running this reducer
        type State;

        /// Commands, replayed events and effect results
        type Action;

        /// Injected dependencies
        type Environment;

        /// Apply `action` to `state` and return the effects to run.
        ///
        /// At most four effects stay inline before the vector allocates.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Descriptions of side effects.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Work for the runtime to perform after a reduce.
    ///
    /// Actions produced by an effect go back through the same reducer.
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Start all effects at once
        Parallel(Vec<Effect<Action>>),

        /// Start each effect after the previous one finished
        Sequential(Vec<Effect<Action>>),

        /// Send `action` after `duration`
        Delay {
            /// Wait before sending
            duration: Duration,
            /// Action to send
            action: Box<Action>,
        },

        /// Await the future; send its action if it returns one
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::None => f.write_str("Effect::None"),
                Self::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
                Self::Sequential(effects) => f.debug_tuple("Effect::Sequential").field(effects).finish(),
                Self::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Self::Future(_) => f.write_str("Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Run `effects` in parallel.
        #[must_use]
        pub const fn merge(effects: Vec<Self>) -> Self {
            Self::Parallel(effects)
        }

        /// Run `effects` one after another.
        #[must_use]
        pub const fn chain(effects: Vec<Self>) -> Self {
            Self::Sequential(effects)
        }

        /// Send `action` back through the store right away.
        ///
        /// Reducers report command outcomes this way so that callers waiting
        /// on the action broadcast see them.
        #[must_use]
        pub fn send(action: Action) -> Self
        where
            Action: Send + 'static,
        {
            Self::Future(Box::pin(async move { Some(action) }))
        }
    }
}

/// Injected dependencies shared across services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Slot identifiers are checked against "now", so every check goes
    /// through a `Clock` rather than `Utc::now()`.
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[test]
    fn merge_and_chain_wrap_effects() {
        let merged = Effect::<u8>::merge(vec![Effect::None, Effect::None]);
        assert!(matches!(merged, Effect::Parallel(ref effects) if effects.len() == 2));

        let chained = Effect::<u8>::chain(vec![Effect::None]);
        assert!(matches!(chained, Effect::Sequential(ref effects) if effects.len() == 1));
    }

    #[test]
    fn send_effect_yields_the_action() {
        let effect = Effect::send(7_u8);
        let Effect::Future(fut) = effect else {
            unreachable!("send always builds a future effect");
        };
        assert_eq!(tokio_test::block_on(fut), Some(7));
    }

    #[test]
    fn debug_hides_future_body() {
        let effect = Effect::send(1_u8);
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
