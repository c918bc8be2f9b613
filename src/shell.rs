use std::{
    path::{Path, PathBuf},
    thread,
};

use anyhow::Result;
use log::{debug, info, warn};

use crate::{
    cloud::{load_pcd_file, PointCloud},
    config::ViewerConfig,
    viewer::Viewer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Loading,
    Displaying,
    Polling,
    Stopped,
}

/// Outcome of one load attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadEntry {
    pub path: PathBuf,
    pub outcome: std::result::Result<usize, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    entries: Vec<LoadEntry>,
}

impl LoadReport {
    pub fn entries(&self) -> &[LoadEntry] {
        &self.entries
    }

    pub fn loaded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.loaded()
    }
}

/// Drives a viewer through load, display and the poll loop.
pub struct Shell<V: Viewer> {
    viewer: V,
    config: ViewerConfig,
    cloud: PointCloud,
    report: LoadReport,
    state: ShellState,
    ticks: u64,
}

impl<V: Viewer> Shell<V> {
    pub fn new(viewer: V, config: ViewerConfig) -> Self {
        Self {
            viewer,
            config,
            cloud: PointCloud::new(),
            report: LoadReport::default(),
            state: ShellState::Loading,
            ticks: 0,
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Number of render ticks spent in the poll loop.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }

    /// Runs to completion. Unreadable files are logged and skipped.
    pub fn run<P: AsRef<Path>>(&mut self, paths: impl IntoIterator<Item = P>) -> Result<()> {
        for path in paths {
            self.load(path.as_ref());
        }

        self.display()?;
        self.poll();

        Ok(())
    }

    fn load(&mut self, path: &Path) {
        debug_assert_eq!(self.state, ShellState::Loading);

        let outcome = match load_pcd_file(path, &mut self.cloud) {
            Ok(count) => {
                info!("loaded {} points from {}", count, path.display());
                Ok(count)
            }
            Err(e) => {
                warn!("skipping {}: {:#}", path.display(), e);
                Err(format!("{:#}", e))
            }
        };

        self.report.entries.push(LoadEntry {
            path: path.to_path_buf(),
            outcome,
        });
    }

    fn display(&mut self) -> Result<()> {
        self.state = ShellState::Displaying;

        info!(
            "displaying {} points from {} of {} file(s)",
            self.cloud.len(),
            self.report.loaded(),
            self.report.entries().len()
        );

        self.viewer.add_point_cloud(&self.cloud, &self.report)
    }

    fn poll(&mut self) {
        self.state = ShellState::Polling;

        while !self.viewer.was_stopped() {
            self.viewer.spin_once(self.config.spin_timeout);
            self.ticks += 1;

            if !self.config.sleep_interval.is_zero() {
                thread::sleep(self.config.sleep_interval);
            }
        }

        debug!("viewer stopped after {} ticks", self.ticks);
        self.state = ShellState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, time::Duration};
    use tempfile::NamedTempFile;

    /// Stops after a fixed number of spins.
    struct Scripted {
        stop_after: u64,
        spins: u64,
        registered: Vec<usize>,
    }

    impl Scripted {
        fn new(stop_after: u64) -> Self {
            Self {
                stop_after,
                spins: 0,
                registered: Vec::new(),
            }
        }
    }

    impl Viewer for Scripted {
        fn add_point_cloud(&mut self, cloud: &PointCloud, _report: &LoadReport) -> Result<()> {
            self.registered.push(cloud.len());
            Ok(())
        }

        fn was_stopped(&self) -> bool {
            self.spins >= self.stop_after
        }

        fn spin_once(&mut self, timeout: Duration) {
            assert_eq!(timeout, Duration::from_millis(100));
            self.spins += 1;
        }
    }

    fn config() -> ViewerConfig {
        ViewerConfig {
            sleep_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn pcd_with(points: &[[f32; 3]]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\n\
             WIDTH {n}\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {n}\nDATA ascii\n",
            n = points.len()
        )
        .unwrap();
        for [x, y, z] in points {
            writeln!(file, "{} {} {}", x, y, z).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn no_arguments_shows_empty_cloud() {
        let mut shell = Shell::new(Scripted::new(1), config());

        shell.run(Vec::<PathBuf>::new()).unwrap();

        assert_eq!(shell.viewer().registered, vec![0]);
        assert_eq!(shell.state(), ShellState::Stopped);
    }

    #[test]
    fn spins_until_stopped_and_no_longer() {
        let mut shell = Shell::new(Scripted::new(25), config());

        shell.run(Vec::<PathBuf>::new()).unwrap();

        assert_eq!(shell.ticks(), 25);
        assert_eq!(shell.viewer().spins, 25);
    }

    #[test]
    fn already_stopped_viewer_is_not_spun() {
        let mut shell = Shell::new(Scripted::new(0), config());

        shell.run(Vec::<PathBuf>::new()).unwrap();

        assert_eq!(shell.ticks(), 0);
        assert_eq!(shell.state(), ShellState::Stopped);
    }

    #[test]
    fn bad_path_is_skipped() {
        let good = pcd_with(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pcd");

        let mut shell = Shell::new(Scripted::new(1), config());
        shell
            .run([missing.clone(), good.path().to_path_buf()])
            .unwrap();

        assert_eq!(shell.viewer().registered, vec![2]);
        assert_eq!(shell.report().loaded(), 1);
        assert_eq!(shell.report().failed(), 1);
        assert_eq!(shell.report().entries()[0].path, missing);
        assert!(shell.report().entries()[0].outcome.is_err());
        assert_eq!(shell.report().entries()[1].outcome, Ok(2));
    }

    #[test]
    fn registers_once_after_all_loads() {
        let a = pcd_with(&[[0.0, 0.0, 0.0]]);
        let b = pcd_with(&[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]);

        let mut shell = Shell::new(Scripted::new(3), config());
        shell.run([a.path(), b.path()]).unwrap();

        assert_eq!(shell.viewer().registered, vec![3]);
        assert_eq!(shell.cloud().len(), 3);
    }
}
