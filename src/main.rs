//! Pocket load tester application.

use core::error::Error;
use std::sync::Arc;

use clap::Parser;
use plt::{
    cfg::{Config, ModeConfig},
    cmd::Cmd,
    loadgen, nethttp,
};
use tokio::runtime::Builder;

pub fn main() {
    let cmd = Cmd::parse();
    plt::logging::init(cmd.verbose as usize).unwrap();

    if let Err(err) = run(cmd) {
        log::error!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cmd: Cmd) -> Result<(), Box<dyn Error>> {
    let cfg: Config = cmd.try_into()?;

    Builder::new_multi_thread()
        .enable_all()
        .thread_name("runtime")
        .build()?
        .block_on(async {
            let Config { load, mode } = cfg;

            match mode {
                ModeConfig::Http(http) => {
                    let producer = nethttp::JobProducer::new(http, &load).await?;

                    loadgen::run(load, Arc::new(producer)).await?;
                }
            }

            Ok(())
        })
}
