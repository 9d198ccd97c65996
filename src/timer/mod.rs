mod controller;
mod events;
mod scheduler;

pub use controller::SessionTracker;
pub use events::TimerEvent;
pub use scheduler::{TimerHandle, MAX_DEFERRED_SECS, TICK_INTERVAL};
