pub mod adaptive;
pub mod breaker;
pub mod queue;
pub mod staleness;

pub use adaptive::{plan, AdaptiveConfig, InstanceDescriptor};
pub use breaker::{BreakerConfig, CircuitBreaker};
pub use queue::{DeadLetterQueue, DlqEntry, TaskQueue};
pub use staleness::StalenessTracker;
