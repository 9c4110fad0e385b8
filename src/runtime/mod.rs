//! Fiber substrate: spawned tasks, their wakers and the ready queue shared
//! with the driver.

pub(crate) mod queue;
mod task;
mod waker;
mod yield_now;

pub(crate) use task::Task;
pub use task::run;
pub use yield_now::{YieldNow, yield_now};
