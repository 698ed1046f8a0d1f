use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use engine_logging::{engine_error, engine_info, engine_warn};

use crate::fleet::MultiSourceOrchestrator;
use crate::progress::{ChannelProgressSink, ProgressSink};
use crate::EngineEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    RunAll { from_date: NaiveDate },
    RunSource { source_id: String, from_date: NaiveDate },
    /// Stops the run in progress; queued runs still execute.
    Cancel,
}

/// Queue consumer for scrape runs. Runs execute one after another on a
/// background runtime; `Cancel` bypasses the queue.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

/// Cloneable, thread-safe way to cancel from elsewhere (signal handlers).
#[derive(Clone)]
pub struct EngineCanceller {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl EngineCanceller {
    pub fn cancel(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Cancel);
    }
}

impl EngineHandle {
    pub fn new(orchestrator: Arc<MultiSourceOrchestrator>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    engine_error!("engine runtime failed to start: {}", err);
                    let _ = event_tx.send(EngineEvent::RunRejected {
                        reason: format!("runtime unavailable: {err}"),
                    });
                    return;
                }
            };
            let sink: Arc<dyn ProgressSink> = Arc::new(ChannelProgressSink::new(event_tx));
            let (job_tx, mut job_rx) = tokio::sync::mpsc::unbounded_channel::<EngineCommand>();

            let worker = {
                let orchestrator = orchestrator.clone();
                runtime.spawn(async move {
                    while let Some(job) = job_rx.recv().await {
                        handle_job(&orchestrator, job, sink.clone()).await;
                    }
                })
            };

            while let Ok(command) = cmd_rx.recv() {
                match command {
                    EngineCommand::Cancel => orchestrator.cancel(),
                    job => {
                        if job_tx.send(job).is_err() {
                            break;
                        }
                    }
                }
            }
            // Handle dropped: let queued runs drain before the runtime goes.
            drop(job_tx);
            if let Err(err) = runtime.block_on(worker) {
                engine_error!("engine worker ended abnormally: {}", err);
            }
        });

        Self { cmd_tx, event_rx }
    }

    pub fn enqueue(&self, command: EngineCommand) {
        let _ = self.cmd_tx.send(command);
    }

    pub fn run_all(&self, from_date: NaiveDate) {
        self.enqueue(EngineCommand::RunAll { from_date });
    }

    pub fn run_source(&self, source_id: impl Into<String>, from_date: NaiveDate) {
        self.enqueue(EngineCommand::RunSource {
            source_id: source_id.into(),
            from_date,
        });
    }

    pub fn cancel(&self) {
        self.enqueue(EngineCommand::Cancel);
    }

    pub fn canceller(&self) -> EngineCanceller {
        EngineCanceller {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Blocks until the next event; `None` once the engine thread is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.event_rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

async fn handle_job(
    orchestrator: &MultiSourceOrchestrator,
    job: EngineCommand,
    sink: Arc<dyn ProgressSink>,
) {
    let result = match job {
        EngineCommand::RunAll { from_date } => {
            engine_info!("job: all sources since {}", from_date);
            orchestrator.run_all(from_date, sink.clone()).await
        }
        EngineCommand::RunSource {
            source_id,
            from_date,
        } => {
            engine_info!("job: {} since {}", source_id, from_date);
            orchestrator.run_source(&source_id, from_date, sink.clone()).await
        }
        EngineCommand::Cancel => return,
    };
    // Completed runs already reported themselves through the sink.
    if let Err(err) = result {
        engine_warn!("job rejected: {}", err);
        sink.emit(EngineEvent::RunRejected {
            reason: err.to_string(),
        });
    }
}
