use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const MIN_LOADING_RADIUS: i32 = 1;
const MAX_LOADING_RADIUS: i32 = 32;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_world_path")]
    pub world_path: PathBuf,
    #[serde(default = "default_loading_radius")]
    pub loading_radius: i32,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    #[serde(default = "default_populate_threads")]
    pub populate_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_path: default_world_path(),
            loading_radius: default_loading_radius(),
            tick_rate: default_tick_rate(),
            populate_threads: default_populate_threads(),
        }
    }
}

impl ServerConfig {
    fn sanitize(mut self) -> Self {
        self.loading_radius = self
            .loading_radius
            .clamp(MIN_LOADING_RADIUS, MAX_LOADING_RADIUS);
        self.tick_rate = self.tick_rate.clamp(1, 120);
        self.populate_threads = self.populate_threads.clamp(1, 16);
        self
    }

    /// Missing file yields the defaults; a malformed file is an error so
    /// a typo never silently reverts someone's settings.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err),
        };
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize config: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let config = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&config).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize config: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }
}

fn default_world_path() -> PathBuf {
    PathBuf::from("world")
}

fn default_loading_radius() -> i32 {
    8
}

fn default_tick_rate() -> u32 {
    20
}

fn default_populate_threads() -> usize {
    2
}
