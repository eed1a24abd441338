use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use atomicwrites::{AllowOverwrite, AtomicFile};
use glob::glob;
use log::{debug, info};
use tokio::time::sleep;

use tarpc::{client, context, tokio_serde::formats::Json};

use crate::{ihash, KeyValue, MapFn, ReduceFn, ServiceClient, Task, TaskKind};

pub struct Worker {
    /// Working directory for intermediate and output files.
    pub dir: PathBuf,
    /// Socket the coordinator serves on.
    pub sock: PathBuf,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

impl Worker {
    /// Poll the coordinator for tasks until told to exit or it goes away.
    pub async fn launch(&self) -> anyhow::Result<()> {
        let client = self.connect().await?;
        loop {
            let task = match client.assign_task(context::current()).await {
                Ok(task) => task,
                Err(_) => {
                    info!("coordinator unreachable, exiting");
                    return Ok(());
                }
            };
            match task.kind {
                TaskKind::Map => {
                    self.do_map(&task)?;
                    self.report(&client, TaskKind::Map, task.id).await;
                }
                TaskKind::Reduce => {
                    self.do_reduce(&task)?;
                    self.report(&client, TaskKind::Reduce, task.id).await;
                }
                TaskKind::Wait => sleep(Duration::from_secs(1)).await,
                TaskKind::Kill => {
                    info!("received kill, exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn connect(&self) -> anyhow::Result<ServiceClient> {
        // The coordinator may still be binding its socket; give it a moment.
        let mut attempts = 0;
        let transport = loop {
            match tarpc::serde_transport::unix::connect(&self.sock, Json::default).await {
                Ok(transport) => break transport,
                Err(e) if attempts < 20 => {
                    debug!("connect to {:?} failed ({}), retrying", self.sock, e);
                    attempts += 1;
                    sleep(Duration::from_millis(250)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("connecting to {:?}", self.sock))
                }
            }
        };
        Ok(ServiceClient::new(client::Config::default(), transport).spawn())
    }

    /// Completion is reported once and never retried; a lost report shows up
    /// as a sweeper re-dispatch, which the atomic file contract makes safe.
    async fn report(&self, client: &ServiceClient, kind: TaskKind, id: usize) {
        if let Err(e) = client.complete_task(context::current(), kind, id).await {
            debug!("completion report for {:?} {} lost: {}", kind, id, e);
        }
    }

    fn do_map(&self, task: &Task) -> anyhow::Result<()> {
        let input = task.inputs.first().context("map task without input file")?;
        let contents =
            fs::read_to_string(input).with_context(|| format!("reading {:?}", input))?;
        let kva = (self.map)(input, &contents);

        let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); task.n_reduce];
        for (key, value) in kva {
            let r = ihash(&key) as usize % task.n_reduce;
            buckets[r].push(KeyValue { key, value });
        }
        // Every bucket gets a file, empty ones included.
        for (r, bucket) in buckets.iter().enumerate() {
            let path = self.dir.join(format!("mr-{}-{}", task.id, r));
            let af = AtomicFile::new(&path, AllowOverwrite);
            af.write(|f| {
                for kv in bucket {
                    serde_json::to_writer(&mut *f, kv).map_err(io::Error::from)?;
                    f.write_all(b"\n")?;
                }
                Ok::<(), io::Error>(())
            })?;
        }
        debug!("map {} over {:?} done", task.id, input);
        Ok(())
    }

    fn do_reduce(&self, task: &Task) -> anyhow::Result<()> {
        let pattern = self.dir.join(format!("mr-*-{}", task.id));
        let pattern = pattern
            .to_str()
            .context("working directory is not valid UTF-8")?;

        // Buckets a map task never produced simply do not match; an absent
        // file is the same as an empty one.
        let mut intermediate = Vec::new();
        for entry in glob(pattern)? {
            let file = File::open(entry?)?;
            let records = serde_json::Deserializer::from_reader(BufReader::new(file));
            for kv in records.into_iter::<KeyValue>() {
                intermediate.push(kv?);
            }
        }
        intermediate.sort_by(|a, b| a.key.cmp(&b.key));

        let out = self.dir.join(format!("mr-out-{}", task.id));
        let af = AtomicFile::new(&out, AllowOverwrite);
        af.write(|f| {
            let mut i = 0;
            while i < intermediate.len() {
                let mut j = i + 1;
                while j < intermediate.len() && intermediate[j].key == intermediate[i].key {
                    j += 1;
                }
                let values: Vec<String> =
                    intermediate[i..j].iter().map(|kv| kv.value.clone()).collect();
                let result = (self.reduce)(&intermediate[i].key, &values);
                writeln!(f, "{} {}", intermediate[i].key, result)?;
                i = j;
            }
            Ok::<(), io::Error>(())
        })?;
        debug!("reduce {} done", task.id);
        Ok(())
    }
}
