//! Background worker — auto-completion of stale tasks.

mod completion;

pub use completion::CompletionWorker;
