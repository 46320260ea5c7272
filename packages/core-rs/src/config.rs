use std::env;

use crate::device::BackendKind;

const BACKEND_ENV: &str = "GPUMAT_BACKEND";
const DEVICE_ENV: &str = "GPUMAT_DEVICE";
const DEVICE_COUNT_ENV: &str = "GPUMAT_DEVICE_COUNT";
const MEMORY_LIMIT_ENV: &str = "GPUMAT_MEMORY_LIMIT";
const MAX_ONES_ENV: &str = "GPUMAT_MAX_ONES";
const RNG_STREAMS_ENV: &str = "GPUMAT_RNG_STREAMS";

/// Length of the resident all-ones vector used by axis sums.
pub const DEFAULT_MAX_ONES: usize = 1024 * 1024 * 32;
/// Number of parallel generator streams in the random pool.
pub const DEFAULT_RNG_STREAMS: usize = 96 * 128;
pub const DEFAULT_DEVICE_COUNT: usize = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: BackendKind,
    pub device_ordinal: usize,
    /// Ordinals exposed by the in-process device.
    pub device_count: usize,
    /// Byte cap on live device allocations; `None` means unbounded.
    pub memory_limit: Option<usize>,
    pub max_ones: usize,
    pub rng_streams: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InProcess,
            device_ordinal: 0,
            device_count: DEFAULT_DEVICE_COUNT,
            memory_limit: None,
            max_ones: DEFAULT_MAX_ONES,
            rng_streams: DEFAULT_RNG_STREAMS,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `GPUMAT_*` environment variables. Values that
    /// are empty, unparsable or zero fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend = env::var(BACKEND_ENV)
            .ok()
            .and_then(|raw| BackendKind::parse(raw.trim()))
            .unwrap_or(defaults.backend);
        Self {
            backend,
            device_ordinal: read_usize(DEVICE_ENV, true).unwrap_or(defaults.device_ordinal),
            device_count: read_usize(DEVICE_COUNT_ENV, false).unwrap_or(defaults.device_count),
            memory_limit: read_usize(MEMORY_LIMIT_ENV, false).or(defaults.memory_limit),
            max_ones: read_usize(MAX_ONES_ENV, false).unwrap_or(defaults.max_ones),
            rng_streams: read_usize(RNG_STREAMS_ENV, false).unwrap_or(defaults.rng_streams),
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_device(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }

    pub fn with_device_count(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_max_ones(mut self, len: usize) -> Self {
        self.max_ones = len;
        self
    }

    pub fn with_rng_streams(mut self, streams: usize) -> Self {
        self.rng_streams = streams.max(1);
        self
    }
}

fn read_usize(key: &str, allow_zero: bool) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|&value| allow_zero || value > 0)
}
