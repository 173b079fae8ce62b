use async_trait::async_trait;
use localq::{Command, CommandHandler, ShutdownToken};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailMode {
    Never,
    First(usize),
    Always,
}

/// Handler that records every command it sees.
///
/// Clones share state, so a test can keep one clone and register another.
pub struct RecordingHandler<C> {
    calls: Arc<Mutex<Vec<C>>>,
    mode: Arc<Mutex<FailMode>>,
    delay: Option<Duration>,
}

impl<C> Clone for RecordingHandler<C> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            mode: Arc::clone(&self.mode),
            delay: self.delay,
        }
    }
}

impl<C: Clone> RecordingHandler<C> {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            mode: Arc::new(Mutex::new(FailMode::Never)),
            delay: None,
        }
    }

    /// Fail the first `times` calls, then succeed.
    pub fn failing(times: usize) -> Self {
        let handler = Self::new();
        *handler.mode.lock() = FailMode::First(times);
        handler
    }

    pub fn always_failing() -> Self {
        let handler = Self::new();
        *handler.mode.lock() = FailMode::Always;
        handler
    }

    /// Sleep for `delay` on every call, aborting early on shutdown.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<C> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.call_count();
        assert_eq!(
            actual, expected,
            "Expected {} handler calls, got {}",
            expected, actual
        );
    }

    /// Poll until at least `count` calls were recorded or `timeout` passes.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.call_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.call_count() >= count
    }
}

impl<C: Clone> Default for RecordingHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C> CommandHandler<C> for RecordingHandler<C>
where
    C: Command + Clone,
{
    async fn handle(&self, command: &C, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        self.calls.lock().push(command.clone());

        if let Some(delay) = self.delay {
            shutdown.sleep(delay).await?;
        }

        let fail = {
            let mut mode = self.mode.lock();
            match *mode {
                FailMode::Never => false,
                FailMode::Always => true,
                FailMode::First(0) => false,
                FailMode::First(n) => {
                    *mode = FailMode::First(n - 1);
                    true
                }
            }
        };

        if fail {
            anyhow::bail!("scripted handler failure");
        }
        Ok(())
    }
}
