use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub frames: u64,
    pub consumer_latency: Duration,
    pub dynamic_vertices: usize,
    pub dynamic_indices: usize,
    pub streamed_vertices: usize,
    /// Simulated device memory.
    pub memory_budget: usize,
    /// Every dynamic buffer discards at the start of every n-th frame.
    pub flush_interval: u64,
    pub load_interval: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 240,
            consumer_latency: Duration::from_millis(4),
            dynamic_vertices: 8192,
            dynamic_indices: 16384,
            streamed_vertices: 4096,
            memory_budget: 16 * 1024 * 1024,
            flush_interval: 8,
            load_interval: Duration::from_millis(20),
        }
    }
}

impl DemoConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(frames) = read_var("GEOSTREAM_FRAMES")? {
            config.frames = frames;
        }
        if let Some(latency) = read_var("GEOSTREAM_LATENCY_MS")? {
            config.consumer_latency = Duration::from_millis(latency);
        }
        Ok(config)
    }
}

fn read_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} is not a valid number: {:?}", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", name)),
    }
}
