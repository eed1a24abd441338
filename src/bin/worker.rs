use std::path::PathBuf;

use structopt::StructOpt;

use mapred::app::wc;
use mapred::{socket_path, Worker};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Directory intermediate and output files are written to
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let w = Worker {
        dir: opt.dir,
        sock: socket_path(),
        map: wc::map,
        reduce: wc::reduce,
    };
    w.launch().await?;
    Ok(())
}
