// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared timing objects for OrdoPlay.
//!
//! A timing object holds a continuously evolving motion (position, velocity
//! and acceleration over time) that many independent consumers can query and
//! update consistently. Converters derive new timing sources from existing
//! ones without breaking that contract.
//!
//! ## Architecture
//!
//! - [`Clock`] and [`Scheduler`]: shared time and cooperative wake-ups
//! - [`motion`]: pure motion math (extrapolation, crossings, range checks)
//! - [`TimingProvider`]: the authority behind a [`TimingObject`]
//! - [`TimingSource`]: the contract shared by [`TimingObject`] and [`Converter`]
//! - [`Notifier`]: synchronous, ordered event delivery
//! - [`PointCallback`] and [`IntervalCallback`]: handlers fired at positions
//!
//! Everything is single-threaded (`Rc`/`RefCell`). Input from other threads
//! enters through a [`ProviderHandle`].

pub mod callback;
pub mod clock;
pub mod config;
pub mod converter;
pub mod error;
pub mod motion;
pub mod notifier;
pub mod provider;
pub mod scheduler;
pub mod source;
mod state;
pub mod timing_object;

pub use callback::{IntervalCallback, PointCallback};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoopbackConfig, TimingConfig};
pub use converter::{Converter, ConverterKind};
pub use error::{Result, TimingError};
pub use motion::{Direction, PartialVector, Range, Vector, EPSILON};
pub use notifier::{Event, Notifier, SubscriptionId};
pub use provider::{
    LoopbackProvider, ProviderEvent, ProviderHandle, SharedProvider, TimingProvider, UpdateRequest,
};
pub use scheduler::{Scheduler, TimerId, Timeout};
pub use source::{
    ChangeInfo, ReadyState, TimingEvent, TimingEventKind, TimingHandler, TimingSource, UpdateId,
};
pub use timing_object::TimingObject;
