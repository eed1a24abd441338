use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime;

use mapred::app::wc;
use mapred::{Coordinator, MapFn, ReduceFn, Worker};

fn run_job(
    dir: &Path,
    files: Vec<PathBuf>,
    n_reduce: usize,
    n_workers: usize,
    task_timeout: Duration,
    map: MapFn,
    reduce: ReduceFn,
) {
    let sock = dir.join("mr.sock");
    // Extra threads so a worker stuck in a slow map function cannot starve
    // the coordinator.
    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let coordinator = Coordinator {
            files,
            n_reduce,
            sock: sock.clone(),
            task_timeout,
        };
        let coordinator = tokio::spawn(async move { coordinator.launch().await.unwrap() });

        let mut workers = Vec::new();
        for _ in 0..n_workers {
            let w = Worker {
                dir: dir.to_owned(),
                sock: sock.clone(),
                map,
                reduce,
            };
            workers.push(tokio::spawn(async move { w.launch().await.unwrap() }));
        }

        coordinator.await.unwrap();
        for w in workers {
            w.await.unwrap();
        }
    });
}

fn collect_output(dir: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for ent in fs::read_dir(dir).unwrap() {
        let p = ent.unwrap().path();
        if let Some(name) = p.file_name() {
            if name.to_str().unwrap().starts_with("mr-out") {
                for l in fs::read_to_string(&p).unwrap().lines() {
                    lines.push(l.to_owned());
                }
            }
        }
    }
    lines.sort();
    lines
}

#[test]
fn wordcount_matches_sequential_reference() {
    let _ = pretty_env_logger::try_init();

    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.txt");
    let b = temp.path().join("b.txt");
    fs::write(&a, "foo bar").unwrap();
    fs::write(&b, "bar baz").unwrap();

    run_job(
        temp.path(),
        vec![a.clone(), b.clone()],
        3,
        2,
        Duration::from_secs(10),
        wc::map,
        wc::reduce,
    );

    assert_eq!(collect_output(temp.path()), vec!["bar 2", "baz 1", "foo 1"]);

    // Cross-check against a sequential run of the same functions.
    let seq = {
        let mut groups = HashMap::<String, Vec<String>>::new();
        for fname in [&a, &b] {
            let contents = fs::read_to_string(fname).unwrap();
            for (k, v) in wc::map(fname, &contents) {
                groups.entry(k).or_default().push(v);
            }
        }
        let mut lines: Vec<String> = groups
            .iter()
            .map(|(k, vs)| format!("{} {}", k, wc::reduce(k, vs)))
            .collect();
        lines.sort();
        lines
    };
    assert_eq!(collect_output(temp.path()), seq);
}

#[test]
fn straggling_map_task_is_reassigned() {
    let _ = pretty_env_logger::try_init();

    static SLOW_ONCE: AtomicBool = AtomicBool::new(true);
    fn slow_map(filename: &Path, contents: &str) -> Vec<(String, String)> {
        if SLOW_ONCE.swap(false, Ordering::SeqCst) {
            // First attempt outlives the coordinator's task timeout.
            std::thread::sleep(Duration::from_secs(3));
        }
        wc::map(filename, contents)
    }

    let temp = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let p = temp.path().join(format!("in-{}.txt", i));
            fs::write(&p, format!("w{} shared", i)).unwrap();
            p
        })
        .collect();

    run_job(
        temp.path(),
        files,
        2,
        2,
        Duration::from_secs(1),
        slow_map,
        wc::reduce,
    );

    assert_eq!(
        collect_output(temp.path()),
        vec!["shared 3", "w0 1", "w1 1", "w2 1"]
    );
}

#[test]
fn job_with_no_input_files_produces_empty_outputs() {
    let _ = pretty_env_logger::try_init();

    let temp = TempDir::new().unwrap();
    run_job(
        temp.path(),
        Vec::new(),
        2,
        1,
        Duration::from_secs(10),
        wc::map,
        wc::reduce,
    );

    for r in 0..2 {
        let out = fs::read_to_string(temp.path().join(format!("mr-out-{}", r))).unwrap();
        assert!(out.is_empty());
    }
}
