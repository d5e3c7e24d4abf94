//! Fixed-size pool of worker processes.
//!
//! Jobs go through one bounded queue. Each slot task owns one child process
//! and feeds it a job at a time over the child's stdin/stdout. Callers wait on
//! a oneshot for their response; a caller that stops waiting (timeout) closes
//! the oneshot, which lets a slot skip the job if it has not started yet and
//! drop the result if it has.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::limits::MAX_QUEUE_SIZE;
use crate::protocol::{FrameCodec, FrameError, TaskRequest, TaskResponse};

/// Flag that switches the processing binary into worker mode.
pub const WORKER_FLAG: &str = "--worker";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker pool is shut down")]
    Closed,
}

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-execute the running binary in worker mode.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_FLAG))
    }

    fn spawn(&self) -> std::io::Result<WorkerProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout not captured"))?;

        Ok(WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn run(
        &mut self,
        codec: &FrameCodec,
        request: &TaskRequest,
    ) -> Result<TaskResponse, FrameError> {
        codec.write_message(&mut self.stdin, request).await?;
        codec.read_message(&mut self.stdout).await
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Worker {:?} already gone: {}", self.pid(), e);
        }
    }
}

struct Job {
    request: TaskRequest,
    reply: oneshot::Sender<TaskResponse>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub command: WorkerCommand,
    pub codec: FrameCodec,
}

impl PoolConfig {
    pub fn new(size: usize, command: WorkerCommand) -> Self {
        Self {
            size: size.max(1),
            command,
            codec: FrameCodec::default(),
        }
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    size: usize,
    cancel: CancellationToken,
    slots: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn every worker up front and start the slot tasks.
    pub async fn start(config: PoolConfig) -> Result<Self, PoolError> {
        let mut workers = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            workers.push(config.command.spawn()?);
        }

        let (sender, receiver) = mpsc::channel(MAX_QUEUE_SIZE);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let mut slots = Vec::with_capacity(config.size);
        for (index, worker) in workers.into_iter().enumerate() {
            tracing::debug!("Worker slot {} started (pid {:?})", index, worker.pid());
            let slot = Slot {
                index,
                command: config.command.clone(),
                codec: config.codec,
                worker: Some(worker),
            };
            slots.push(tokio::spawn(slot.run(receiver.clone(), cancel.clone())));
        }

        tracing::info!("Worker pool started with {} processes", config.size);
        Ok(Self {
            sender,
            size: config.size,
            cancel,
            slots: Mutex::new(slots),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `request` on the next free worker.
    ///
    /// `timeout` covers queue wait plus execution. On expiry the caller gets
    /// a `timeout` error response; the worker keeps running and its late
    /// result is discarded.
    pub async fn submit(&self, request: TaskRequest, timeout: Duration) -> TaskResponse {
        let (reply, response) = oneshot::channel();
        let job = Job { request, reply };

        let dispatch = async {
            if self.sender.send(job).await.is_err() {
                return TaskResponse::error(PoolError::Closed.to_string());
            }
            response
                .await
                .unwrap_or_else(|_| TaskResponse::error(PoolError::Closed.to_string()))
        };

        match tokio::time::timeout(timeout, dispatch).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("Task timed out after {:?}", timeout);
                TaskResponse::timeout()
            }
        }
    }

    /// Stop the slots and kill every worker process.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let slots = std::mem::take(&mut *self.slots.lock().await);
        for slot in slots {
            let _ = slot.await;
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Slot {
    index: usize,
    command: WorkerCommand,
    codec: FrameCodec,
    worker: Option<WorkerProcess>,
}

impl Slot {
    async fn run(mut self, jobs: Arc<Mutex<mpsc::Receiver<Job>>>, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                job = async { jobs.lock().await.recv().await } => job,
            };
            let Some(job) = next else { break };

            if job.reply.is_closed() {
                tracing::debug!("Slot {}: skipping job abandoned while queued", self.index);
                continue;
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = job.reply.send(TaskResponse::error(PoolError::Closed.to_string()));
                    break;
                }
                response = self.execute(&job.request) => response,
            };

            if job.reply.send(response).is_err() {
                tracing::debug!(
                    "Slot {}: discarding late result for '{}' task",
                    self.index,
                    job.request.task
                );
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.kill().await;
        }
        tracing::debug!("Worker slot {} stopped", self.index);
    }

    async fn execute(&mut self, request: &TaskRequest) -> TaskResponse {
        if self.worker.is_none() {
            match self.command.spawn() {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => {
                    tracing::error!("Slot {}: cannot spawn worker: {}", self.index, e);
                    return TaskResponse::error(PoolError::Spawn(e).to_string());
                }
            }
        }
        let Some(worker) = self.worker.as_mut() else {
            return TaskResponse::error(PoolError::Closed.to_string());
        };

        match worker.run(&self.codec, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    "Slot {}: worker {:?} failed on '{}' task: {}",
                    self.index,
                    worker.pid(),
                    request.task,
                    e
                );
                self.replace_worker().await;
                TaskResponse::error(format!("worker process failed: {}", e))
            }
        }
    }

    async fn replace_worker(&mut self) {
        if let Some(dead) = self.worker.take() {
            dead.kill().await;
        }
        match self.command.spawn() {
            Ok(worker) => {
                tracing::info!(
                    "Slot {}: replaced worker process (pid {:?})",
                    self.index,
                    worker.pid()
                );
                self.worker = Some(worker);
            }
            // Retried on the next job.
            Err(e) => tracing::error!("Slot {}: cannot respawn worker: {}", self.index, e),
        }
    }
}
