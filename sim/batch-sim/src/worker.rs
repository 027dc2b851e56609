//! Dispatch of physics steps, on a worker thread or inline.
//!
//! The worker owns the [`PhysicsState`] outright. Step inputs and the spare
//! snapshot buffer travel over one channel and the filled snapshot comes back
//! over another, so there is no shared mutable state between threads.

use std::sync::mpsc;
use std::thread;

use tracing::{error, info};

use crate::collection::Collection;
use crate::error::{BatchError, BatchResult};
use crate::physics::{PhysicsState, StepSnapshot};

enum WorkerCommand {
    Step {
        actions: Vec<f32>,
        resets: Vec<Option<usize>>,
        snapshot: Box<StepSnapshot>,
    },
    Reload(Box<Collection>),
    Shutdown,
}

enum WorkerReply {
    Stepped(BatchResult<Box<StepSnapshot>>),
    Reloaded(BatchResult<()>),
}

pub(crate) struct PhysicsWorker {
    tx: mpsc::Sender<WorkerCommand>,
    reply_rx: mpsc::Receiver<WorkerReply>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PhysicsWorker {
    fn spawn(mut state: PhysicsState) -> BatchResult<Self> {
        let (tx, rx) = mpsc::channel::<WorkerCommand>();
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>();
        let handle = thread::Builder::new()
            .name("batch-sim-physics".into())
            .spawn(move || {
                info!("Physics worker started");
                while let Ok(command) = rx.recv() {
                    let reply = match command {
                        WorkerCommand::Step {
                            actions,
                            resets,
                            mut snapshot,
                        } => WorkerReply::Stepped(
                            state
                                .step(&actions, &resets, &mut snapshot)
                                .map(|()| snapshot),
                        ),
                        WorkerCommand::Reload(collection) => {
                            WorkerReply::Reloaded(state.reload(&collection))
                        }
                        WorkerCommand::Shutdown => break,
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                info!("Physics worker stopped");
            })
            .map_err(BatchError::WorkerSpawn)?;

        Ok(Self {
            tx,
            reply_rx,
            handle: Some(handle),
        })
    }

    fn send(&self, command: WorkerCommand) -> BatchResult<()> {
        self.tx
            .send(command)
            .map_err(|_| BatchError::WorkerDisconnected)
    }

    fn recv(&self) -> BatchResult<WorkerReply> {
        self.reply_rx
            .recv()
            .map_err(|_| BatchError::WorkerDisconnected)
    }
}

impl Drop for PhysicsWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            error!(?err, "Physics worker thread panicked");
        }
    }
}

/// Runs physics steps either on the calling thread or on [`PhysicsWorker`].
///
/// Inline steps are deferred until `wait_step` so both modes have the same
/// start/wait shape.
pub(crate) enum PhysicsRunner {
    Inline {
        state: Box<PhysicsState>,
        pending: Option<(Vec<f32>, Vec<Option<usize>>, Box<StepSnapshot>)>,
    },
    Worker(PhysicsWorker),
}

impl PhysicsRunner {
    pub(crate) fn new(state: PhysicsState, asynchronous: bool) -> BatchResult<Self> {
        if asynchronous {
            Ok(Self::Worker(PhysicsWorker::spawn(state)?))
        } else {
            Ok(Self::Inline {
                state: Box::new(state),
                pending: None,
            })
        }
    }

    /// Hands a step to the physics side. `snapshot` is the buffer it fills.
    pub(crate) fn start_step(
        &mut self,
        actions: Vec<f32>,
        resets: Vec<Option<usize>>,
        snapshot: Box<StepSnapshot>,
    ) -> BatchResult<()> {
        match self {
            Self::Inline { pending, .. } => {
                *pending = Some((actions, resets, snapshot));
                Ok(())
            }
            Self::Worker(worker) => worker.send(WorkerCommand::Step {
                actions,
                resets,
                snapshot,
            }),
        }
    }

    /// Blocks until the started step completes and returns its snapshot.
    ///
    /// # Panics
    ///
    /// Panics when no step was started.
    pub(crate) fn wait_step(&mut self) -> BatchResult<Box<StepSnapshot>> {
        match self {
            Self::Inline { state, pending } => {
                let Some((actions, resets, mut snapshot)) = pending.take() else {
                    panic!("wait_step called without a started step");
                };
                state.step(&actions, &resets, &mut snapshot)?;
                Ok(snapshot)
            }
            Self::Worker(worker) => match worker.recv()? {
                WorkerReply::Stepped(result) => result,
                WorkerReply::Reloaded(_) => panic!("wait_step received a reload reply"),
            },
        }
    }

    /// Applies a collection on the physics side. Must not overlap a step.
    pub(crate) fn reload(&mut self, collection: Collection) -> BatchResult<()> {
        match self {
            Self::Inline { state, .. } => state.reload(&collection),
            Self::Worker(worker) => {
                worker.send(WorkerCommand::Reload(Box::new(collection)))?;
                match worker.recv()? {
                    WorkerReply::Reloaded(result) => result,
                    WorkerReply::Stepped(_) => panic!("reload received a step reply"),
                }
            }
        }
    }
}
