use std::env;
use std::sync::OnceLock;

#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
const THREAD_ENV: &str = "GPUMAT_CPU_THREADS";
const DISABLE_ENV: &str = "GPUMAT_DISABLE_PARALLEL";
const MIN_ELEMS_ENV: &str = "GPUMAT_PARALLEL_MIN_ELEMS";

const DEFAULT_MIN_ELEMS: usize = 64 * 1024;

#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
static THREAD_OVERRIDE: OnceLock<Option<usize>> = OnceLock::new();
static DISABLE_PARALLEL: OnceLock<bool> = OnceLock::new();
static MIN_ELEMENTS: OnceLock<usize> = OnceLock::new();

#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
pub fn thread_override() -> Option<usize> {
    *THREAD_OVERRIDE.get_or_init(|| match env::var(THREAD_ENV) {
        Ok(value) => match value.trim() {
            "" => None,
            raw => match raw.parse::<usize>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => None,
            },
        },
        Err(_) => None,
    })
}

pub fn parallel_disabled() -> bool {
    *DISABLE_PARALLEL.get_or_init(|| {
        matches!(
            env::var(DISABLE_ENV)
                .ok()
                .map(|raw| raw.trim().to_ascii_lowercase()),
            Some(ref value) if value == "1" || value == "true" || value == "yes"
        )
    })
}

fn min_elements_threshold() -> usize {
    *MIN_ELEMENTS.get_or_init(|| {
        env::var(MIN_ELEMS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&value| value > 0)
            .unwrap_or(DEFAULT_MIN_ELEMS)
    })
}

/// Whether a host kernel over `len` elements should fan out to rayon.
#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
pub fn should_parallelize(len: usize) -> bool {
    if !cfg!(feature = "parallel") || parallel_disabled() {
        return false;
    }
    len >= min_elements_threshold()
}

#[cfg(feature = "parallel")]
use std::sync::Once;

#[cfg(feature = "parallel")]
static INIT_RAYON: Once = Once::new();

#[cfg(feature = "parallel")]
pub fn ensure_rayon_pool() {
    use rayon::ThreadPoolBuilder;
    INIT_RAYON.call_once(|| {
        let builder = match thread_override() {
            Some(threads) => ThreadPoolBuilder::new().num_threads(threads),
            None => ThreadPoolBuilder::new(),
        };
        if let Err(err) = builder.build_global() {
            log::debug!("rayon global pool already configured: {err}");
        }
    });
}

#[cfg(not(feature = "parallel"))]
pub fn ensure_rayon_pool() {}
