use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{future, prelude::*};
use log::{debug, info};
use tokio::sync::mpsc;

use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};

use crate::{Service, Task, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Map,
    Reduce,
    AllDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Waiting,
    Working,
    Done,
}

#[derive(Debug)]
struct TaskMeta {
    state: TaskState,
    /// Set iff `state` is `Working`.
    started_at: Option<Instant>,
    task: Task,
}

/// All authoritative job state behind one coarse mutex. Critical sections
/// stay short: no I/O and no queue sends happen under the lock.
struct State {
    phase: Phase,
    n_map: usize,
    n_reduce: usize,
    n_map_done: usize,
    n_reduce_done: usize,
    timeout: Duration,
    queue_tx: mpsc::Sender<Task>,
    queue_rx: mpsc::Receiver<Task>,
    /// One record per task id of the current phase. The map id space is
    /// replaced wholesale when the reduce phase begins.
    meta: HashMap<usize, TaskMeta>,
}

impl State {
    fn new(files: &[PathBuf], n_reduce: usize, timeout: Duration) -> Self {
        let n_map = files.len();
        let (queue_tx, queue_rx) = mpsc::channel(n_map.max(1));
        let mut state = State {
            phase: Phase::Map,
            n_map,
            n_reduce,
            n_map_done: 0,
            n_reduce_done: 0,
            timeout,
            queue_tx,
            queue_rx,
            meta: HashMap::new(),
        };
        for (id, file) in files.iter().enumerate() {
            state.insert_waiting(Task {
                kind: TaskKind::Map,
                id,
                inputs: vec![file.clone()],
                n_reduce,
                n_map,
            });
        }
        if n_map == 0 {
            state.start_reduce_phase();
        }
        state
    }

    fn insert_waiting(&mut self, task: Task) {
        self.meta.insert(
            task.id,
            TaskMeta {
                state: TaskState::Waiting,
                started_at: None,
                task: task.clone(),
            },
        );
        self.queue_tx
            .try_send(task)
            .expect("queue is sized to hold every task of the phase");
    }

    fn assign(&mut self, now: Instant) -> Task {
        if self.phase == Phase::AllDone {
            return Task::kill();
        }
        let Ok(task) = self.queue_rx.try_recv() else {
            return Task::wait();
        };
        match self.meta.get_mut(&task.id) {
            Some(meta) if meta.state != TaskState::Done => {
                meta.state = TaskState::Working;
                meta.started_at = Some(now);
                task
            }
            // Completed while still queued; nothing to hand out.
            _ => Task::wait(),
        }
    }

    fn complete(&mut self, kind: TaskKind, id: usize) {
        let Some(meta) = self.meta.get_mut(&id) else {
            return;
        };
        if meta.state != TaskState::Working || meta.task.kind != kind {
            // Stale report from a worker whose task was already reclaimed.
            return;
        }
        meta.state = TaskState::Done;
        meta.started_at = None;
        match kind {
            TaskKind::Map => {
                self.n_map_done += 1;
                info!("map task {} done ({}/{})", id, self.n_map_done, self.n_map);
                if self.n_map_done == self.n_map {
                    self.start_reduce_phase();
                }
            }
            TaskKind::Reduce => {
                self.n_reduce_done += 1;
                info!(
                    "reduce task {} done ({}/{})",
                    id, self.n_reduce_done, self.n_reduce
                );
                if self.n_reduce_done == self.n_reduce {
                    info!("all tasks done");
                    self.phase = Phase::AllDone;
                }
            }
            TaskKind::Wait | TaskKind::Kill => {}
        }
    }

    fn start_reduce_phase(&mut self) {
        info!("map phase finished, starting reduce phase");
        self.phase = Phase::Reduce;
        let (queue_tx, queue_rx) = mpsc::channel(self.n_reduce.max(1));
        self.queue_tx = queue_tx;
        self.queue_rx = queue_rx;
        self.meta.clear();
        for id in 0..self.n_reduce {
            self.insert_waiting(Task {
                kind: TaskKind::Reduce,
                id,
                inputs: Vec::new(),
                n_reduce: self.n_reduce,
                n_map: self.n_map,
            });
        }
        if self.n_reduce == 0 {
            self.phase = Phase::AllDone;
        }
    }

    /// Reset timed-out assignments to `Waiting` and hand their descriptors
    /// back to the caller, who re-enqueues them after releasing the lock.
    fn sweep(&mut self, now: Instant) -> Vec<Task> {
        let mut stale = Vec::new();
        for meta in self.meta.values_mut() {
            if meta.state != TaskState::Working {
                continue;
            }
            if let Some(started_at) = meta.started_at {
                if now.duration_since(started_at) > self.timeout {
                    meta.state = TaskState::Waiting;
                    meta.started_at = None;
                    stale.push(meta.task.clone());
                }
            }
        }
        stale
    }

    fn is_done(&self) -> bool {
        self.phase == Phase::AllDone
    }
}

#[derive(Clone)]
struct CoordinatorServer {
    state: Arc<Mutex<State>>,
}

impl Service for CoordinatorServer {
    async fn assign_task(self, _: context::Context) -> Task {
        let task = self.state.lock().unwrap().assign(Instant::now());
        debug!("assign -> {:?} {}", task.kind, task.id);
        task
    }

    async fn complete_task(self, _: context::Context, kind: TaskKind, id: usize) {
        self.state.lock().unwrap().complete(kind, id);
    }
}

/// Once per second, reclaim in-flight tasks whose workers have apparently
/// died. Descriptors are re-enqueued outside the lock: the queue is bounded
/// and sends must never happen inside the critical section.
async fn sweeper(state: Arc<Mutex<State>>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let (queue, stale) = {
            let mut state = state.lock().unwrap();
            if state.is_done() {
                return;
            }
            (state.queue_tx.clone(), state.sweep(Instant::now()))
        };
        for task in stale {
            info!("{:?} task {} timed out, requeueing", task.kind, task.id);
            // A send only fails if the phase switched underneath us, in
            // which case the descriptor is obsolete anyway.
            let _ = queue.try_send(task);
        }
    }
}

pub struct Coordinator {
    /// Input files; one map task per file.
    pub files: Vec<PathBuf>,
    pub n_reduce: usize,
    /// Unix socket the RPC server binds to.
    pub sock: PathBuf,
    /// In-flight tasks older than this are reclaimed by the sweeper.
    pub task_timeout: Duration,
}

impl Coordinator {
    /// Serve the job until every task is done, then tear the server down.
    pub async fn launch(&self) -> io::Result<()> {
        let state = Arc::new(Mutex::new(State::new(
            &self.files,
            self.n_reduce,
            self.task_timeout,
        )));

        match fs::remove_file(&self.sock) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let mut listener = tarpc::serde_transport::unix::listen(&self.sock, Json::default).await?;
        listener.config_mut().max_frame_length(4294967296);
        info!("coordinator listening on {:?}", self.sock);

        let server = CoordinatorServer {
            state: state.clone(),
        };
        let accept = tokio::spawn(
            listener
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .map(move |channel| channel.execute(server.clone().serve()).for_each(spawn))
                .buffer_unordered(10)
                .for_each(|_| async {}),
        );
        let sweep = tokio::spawn(sweeper(state.clone()));

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            if state.lock().unwrap().is_done() {
                break;
            }
        }
        info!("job finished, shutting down");
        accept.abort();
        let _ = sweep.await;
        let _ = fs::remove_file(&self.sock);
        Ok(())
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}
