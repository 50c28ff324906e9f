//! The machine runtime.
//!
//! - [`StateMachine`]: the shared handle owning states, groups, and history
//! - Transition execution: the lifecycle pipeline behind
//!   [`StateMachine::transition`]
//! - Auto-evaluation: [`StateMachine::update_context`] and friends
//! - Extension points: [`Middleware`], [`Plugin`], observers, [`Telemetry`]

mod error;
mod evaluation;
mod executor;
pub(crate) mod machine;
mod middleware;
mod observer;
mod plugin;
pub(crate) mod telemetry;

pub use error::ConfigError;
pub use middleware::{Middleware, MiddlewareArgs, Next};
pub use observer::{AfterObserver, BeforeObserver, FailedObserver};
pub use plugin::{Installable, Plugin};
pub use telemetry::{LogLevel, Telemetry, TracingTelemetry};

pub use self::machine::StateMachine;
