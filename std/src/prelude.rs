pub use crate::workers::map::{MapWorker, TransformWorker, WorkerExt};
pub use crate::workers::source::{FinishedWorker, FutureWorker, StreamWorker};
pub use crate::workers::time::{IntervalWorker, TimerWorker};
