//! Signal providers for pilot.
//!
//! A [`SignalDispatcher`] turns a bar window and the current [`BotState`]
//! into a [`Signal`]. It tries the optional enhanced provider first and
//! falls back to the always-available baseline strategies.
//!
//! [`BotState`]: pilot_core::BotState
//! [`Signal`]: pilot_core::Signal

pub mod baseline;
pub mod config;
pub mod dispatcher;
pub mod enhanced;
pub mod error;
pub mod indicators;
pub mod provider;

pub use baseline::{is_known_strategy, BaselineProvider, RSI, SMA_CROSS, STRATEGIES};
pub use config::{EnhancedProfile, SignalConfig};
pub use dispatcher::{normalize, FallbackReason, SignalDispatcher};
pub use enhanced::{EnhancedSlot, EnhancedSource, EnsembleProvider};
pub use error::{SignalError, SignalResult};
pub use provider::{DynSignalProvider, SignalProvider};
