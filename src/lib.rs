pub mod cloud;
mod compressed;
pub mod config;
mod engine;
pub mod shell;
pub mod viewer;

use std::path::PathBuf;

use anyhow::Result;

pub use cloud::{load_pcd_file, PointCloud, PointXYZ};
pub use config::ViewerConfig;
pub use shell::{LoadReport, Shell, ShellState};
pub use viewer::{PcdViewer, Viewer};

/// Loads `paths` into one cloud, shows it and blocks until the window is
/// closed.
pub fn run(paths: Vec<PathBuf>) -> Result<()> {
    let config = ViewerConfig::default();
    let viewer = PcdViewer::new(&config)?;

    Shell::new(viewer, config).run(paths)
}
