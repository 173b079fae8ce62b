/// Runtime builder and handler registration.
pub mod builder;
/// Fetch loop leasing batches into the hand-off queue.
pub mod fetcher;
/// Bounded hand-off queue between the fetch loop and workers.
pub mod handoff;
/// Cancellation token shared by every background task.
pub mod shutdown;
/// Periodic storage summary sampling.
pub mod summary;
/// Runtime supervisor spawning and joining the background tasks.
pub mod supervisor;
/// Dispatcher and worker loop.
pub mod worker;

pub use builder::CommandRuntimeBuilder;
pub use fetcher::FetchLoop;
pub use handoff::{handoff, HandoffReceiver, HandoffSender};
pub use shutdown::ShutdownToken;
pub use summary::SummaryReporter;
pub use supervisor::CommandRuntime;
pub use worker::{worker_loop, Dispatcher};
