//! Progress streaming
//!
//! Polls a task's snapshot and yields [`ProgressEvent`]s. A snapshot is
//! emitted the first time, whenever `current` or `status` changed since the
//! last emission, and on reaching a terminal status, after which the stream
//! ends. A stream that outlives its wall-clock budget yields one `Timeout`
//! event and ends. Readers only clone the snapshot; any number may run.

use futures::stream::Stream;
use papr_common::config::ProgressConfig;
use papr_common::events::{ProgressEvent, TaskStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use crate::services::task_orchestrator::TaskContext;

#[derive(Debug, Clone, Copy)]
pub struct ProgressChannel {
    poll_interval: Duration,
    max_stream: Duration,
}

impl ProgressChannel {
    pub fn new(config: &ProgressConfig) -> Self {
        Self::with_timing(config.poll_interval(), config.max_stream())
    }

    pub fn with_timing(poll_interval: Duration, max_stream: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            max_stream,
        }
    }

    pub fn stream(&self, ctx: Arc<TaskContext>) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let poll_interval = self.poll_interval;
        let max_stream = self.max_stream;

        async_stream::stream! {
            let start = Instant::now();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last: Option<(usize, TaskStatus)> = None;

            tracing::debug!(task_id = %ctx.task_id(), "Progress stream started");

            loop {
                ticker.tick().await;

                let snapshot = ctx.snapshot();
                let key = (snapshot.current, snapshot.status);
                let terminal = snapshot.is_terminal();

                if last != Some(key) {
                    last = Some(key);
                    yield ProgressEvent::Snapshot { snapshot };
                }

                if terminal {
                    tracing::debug!(task_id = %ctx.task_id(), "Progress stream finished");
                    break;
                }

                if start.elapsed() >= max_stream {
                    tracing::warn!(
                        task_id = %ctx.task_id(),
                        budget_secs = max_stream.as_secs(),
                        "Progress stream budget exhausted"
                    );
                    yield ProgressEvent::Timeout {
                        task_id: ctx.task_id().to_string(),
                        elapsed_secs: start.elapsed().as_secs(),
                        last_status: key.1,
                    };
                    break;
                }
            }
        }
    }
}
