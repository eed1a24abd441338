use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use atomicwrites::{AllowOverwrite, AtomicFile};
use log::trace;
use structopt::StructOpt;

use mapred::app::wc::{map, reduce};
use mapred::ihash;

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Files to process
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Directory output files are written to
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let mut groups = HashMap::<String, Vec<String>>::new();
    for fname in opt.files.iter() {
        let contents = fs::read_to_string(fname)?;
        for (k, v) in map(fname, &contents) {
            groups.entry(k).or_default().push(v);
        }
    }

    // Partition with the same hash the workers use so each mrs-out-<r> file
    // matches the engine's mr-out-<r> line for line once sorted.
    let mut result = HashMap::<usize, Vec<(String, String)>>::new();
    for (k, vs) in groups.iter() {
        let r = ihash(k) as usize % opt.nreduce;
        let v = reduce(k, vs);
        result.entry(r).or_default().push((k.clone(), v));
    }

    for r in 0..opt.nreduce {
        let path = opt.dir.join(format!("mrs-out-{}", r));
        let mut lines = result.remove(&r).unwrap_or_default();
        lines.sort();
        let af = AtomicFile::new(&path, AllowOverwrite);
        af.write(|f| {
            for (k, v) in lines.iter() {
                writeln!(f, "{} {}", k, v)?;
            }
            Ok::<(), std::io::Error>(())
        })?;
        trace!("output {:?}", path);
    }
    Ok(())
}
