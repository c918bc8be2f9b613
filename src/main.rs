use std::{env, path::PathBuf, process::ExitCode};

use env_logger::Env;
use log::error;
use pcd_viewer::run;

const DEFAULT_LOG_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_LOG_FILTER)).init();

    let paths: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();

    match run(paths) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
