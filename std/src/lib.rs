//! Stock workers for the Workflow runtime: timers, intervals, one-shot
//! futures, streams and output mappers.

pub mod prelude;
pub mod workers;

pub use workers::map::{MapWorker, TransformWorker, WorkerExt};
pub use workers::source::{FinishedWorker, FutureWorker, StreamWorker};
pub use workers::time::{IntervalWorker, TimerWorker};
