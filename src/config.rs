use std::time::Duration;

/// Built-in settings of the viewer. There are no flags or config files; tests
/// build their own values to avoid real sleeps.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Upper bound for one render tick.
    pub spin_timeout: Duration,
    /// Pause between two ticks of the poll loop.
    pub sleep_interval: Duration,
    pub point_size: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "PCD Cloud Viewer".to_string(),
            width: 1280,
            height: 720,
            spin_timeout: Duration::from_millis(100),
            sleep_interval: Duration::from_millis(100),
            point_size: 2.0,
        }
    }
}
