use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tracing::{debug, warn};

use runplane_core_types::RunId;

use crate::api::RunEventLog;
use crate::config::PublisherCfg;
use crate::model::{RunEvent, RunStatus};

/// Unit pushed to one subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
    Event(RunEvent),
    /// The run reached `status` and every event has been delivered.
    Closed { status: RunStatus },
    /// Tailing failed; no further items follow.
    Failed { message: String },
}

/// Turns the contents of a [`RunEventLog`] into resumable, ordered push streams.
///
/// Subscribers are independent: each one owns its cursor and only reads from
/// the log, so a disconnecting subscriber never affects the run or its peers.
#[derive(Clone)]
pub struct RunStreamPublisher {
    log: Arc<dyn RunEventLog>,
    poll_interval: Duration,
}

impl RunStreamPublisher {
    pub fn new(log: Arc<dyn RunEventLog>, cfg: &PublisherCfg) -> Self {
        Self {
            log,
            poll_interval: cfg.poll_interval(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Streams every event after `last_sequence` (`-1` for the whole run) in
    /// ascending order, then a single [`StreamItem::Closed`] once the run is
    /// terminal. A read failure yields one [`StreamItem::Failed`] and ends the stream.
    pub fn subscribe(
        &self,
        run_id: RunId,
        last_sequence: i64,
    ) -> impl Stream<Item = StreamItem> + Send + 'static {
        let log = Arc::clone(&self.log);
        let poll_interval = self.poll_interval;
        stream! {
            let mut cursor = last_sequence.max(-1);
            loop {
                match log.read_since(&run_id, cursor).await {
                    Ok(events) => {
                        for event in events {
                            cursor = event.sequence as i64;
                            yield StreamItem::Event(event);
                        }
                    }
                    Err(err) => {
                        warn!(run_id = %run_id, %err, "run stream read failed");
                        yield StreamItem::Failed { message: err.to_string() };
                        return;
                    }
                }

                let status = match log.status(&run_id).await {
                    Ok(status) => status,
                    Err(err) => {
                        warn!(run_id = %run_id, %err, "run stream status check failed");
                        yield StreamItem::Failed { message: err.to_string() };
                        return;
                    }
                };

                if status.is_terminal() {
                    // the closing event may have landed between the read and the status check
                    match log.read_since(&run_id, cursor).await {
                        Ok(events) => {
                            for event in events {
                                cursor = event.sequence as i64;
                                yield StreamItem::Event(event);
                            }
                        }
                        Err(err) => {
                            yield StreamItem::Failed { message: err.to_string() };
                            return;
                        }
                    }
                    debug!(run_id = %run_id, %status, last_sequence = cursor, "run stream closed");
                    yield StreamItem::Closed { status };
                    return;
                }

                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
