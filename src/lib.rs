//! A small fault-tolerant MapReduce engine: one coordinator hands map and
//! reduce tasks to a pool of workers over a local socket, re-dispatching
//! tasks whose workers have apparently died.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod app;
pub mod coordinator;
pub mod worker;

pub use coordinator::Coordinator;
pub use worker::Worker;

#[tarpc::service]
pub trait Service {
    /// Hand out one task descriptor, or a `Wait`/`Kill` sentinel.
    async fn assign_task() -> Task;
    /// Report a finished task. Stale reports are silently dropped.
    async fn complete_task(kind: TaskKind, id: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
    /// Nothing to hand out right now; ask again shortly.
    Wait,
    /// The job is finished and the worker should exit.
    Kill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub id: usize,
    /// The input file for a map task; empty for a reduce task, whose worker
    /// discovers its inputs by matching intermediate file names against `id`.
    pub inputs: Vec<PathBuf>,
    pub n_reduce: usize,
    pub n_map: usize,
}

impl Task {
    pub fn wait() -> Self {
        Task {
            kind: TaskKind::Wait,
            id: 0,
            inputs: Vec::new(),
            n_reduce: 0,
            n_map: 0,
        }
    }

    pub fn kill() -> Self {
        Task {
            kind: TaskKind::Kill,
            id: 0,
            inputs: Vec::new(),
            n_reduce: 0,
            n_map: 0,
        }
    }
}

/// One record of an intermediate `mr-<mapId>-<reduceId>` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

pub type MapFn = fn(&Path, &str) -> Vec<(String, String)>;
pub type ReduceFn = fn(&str, &[String]) -> String;

/// 32-bit FNV-1a with the sign bit cleared. Workers and the sequential
/// driver must agree on this so keys land in the same reduce partition.
pub fn ihash(key: &str) -> u32 {
    let mut h: u32 = 2166136261;
    for b in key.as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(16777619);
    }
    h & 0x7fffffff
}

/// Per-user rendezvous socket shared by the coordinator and worker binaries.
pub fn socket_path() -> PathBuf {
    PathBuf::from(format!("/var/tmp/824-mr-{}", unsafe { libc::getuid() }))
}
