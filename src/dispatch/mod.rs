pub mod mime;
pub mod personalize;
pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::{BatchReport, DispatchWorker, ItemOutcome, ItemStatus};
