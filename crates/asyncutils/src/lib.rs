//! Small async building blocks shared by the cache and the engine.
//!
//! - [`SingleFlight`] coalesces concurrent requests for the same key into one
//!   underlying future whose output every caller receives.
//! - [`TaskSet`] owns keyed background tasks that can be cancelled
//!   individually or all at once.

mod flight;
mod tasks;

pub use crate::flight::{Flight, SingleFlight};
pub use crate::tasks::TaskSet;
pub use tokio_util::sync::CancellationToken;
