use crate::logging::Verbosity;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Engine tuning knobs. `event_limit` caps the number of completions the
/// pump dispatches per tick (0 = drain everything); `fail_fast` promotes
/// entity-surfaced errors to panics and defaults to on in debug builds.
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub read_buffer_size: usize,
    pub event_limit: usize,
    pub fail_fast: bool,
    pub verbosity: Verbosity,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_limit: 0,
            fail_fast: cfg!(debug_assertions),
            verbosity: Verbosity::None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Config {
        let file = File::open(path).expect("Error opening engine configuration file");
        serde_json::from_reader(file).expect("Error loading engine configuration file")
    }
}
