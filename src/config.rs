//! Process-wide configuration, read from the environment with the defaults
//! documented in §6. Mirrors `GlobalOptions`/`parse_global_options` in the
//! `cxr-infer` binary: every knob is an env var with a hardcoded fallback,
//! parsed once at startup rather than threaded through as CLI flags.

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url:    String,

    pub worker_count: u32,

    pub batch_window:     Duration,
    pub max_batch_size:   usize,
    pub brpop_timeout:    Duration,
    pub inference_timeout: Duration,

    pub max_retries: u32,

    pub image_ttl: Duration,
    pub retry_ttl: Duration,

    pub stuck_in_progress: Duration,
    pub stuck_queued:      Duration,

    pub supervisor_tick:  Duration,
    pub recovery_period:  Duration,

    pub inference_device: InferenceDevice,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InferenceDevice {
    Cpu,
    Gpu,
}

impl Config {
    /// Reads every knob from the environment, falling back to the defaults
    /// in §6 when a variable is unset or fails to parse.
    pub fn from_env() -> Config {
        Config {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url:    env::var("REDIS_URL").expect("REDIS_URL must be set"),

            worker_count: env_parse("WORKER_COUNT", 2),

            batch_window:      Duration::from_millis(env_parse("BATCH_WINDOW_MS", 30)),
            max_batch_size:    env_parse("MAX_BATCH_SIZE", 8),
            brpop_timeout:     Duration::from_secs(env_parse("BRPOP_TIMEOUT_S", 5)),
            inference_timeout: Duration::from_secs(env_parse("INFERENCE_TIMEOUT_S", 10)),

            max_retries: env_parse("MAX_RETRIES", 3),

            image_ttl: Duration::from_secs(env_parse("IMAGE_TTL_S", 600)),
            retry_ttl: Duration::from_secs(env_parse("RETRY_TTL_S", 3600)),

            stuck_in_progress: Duration::from_secs(env_parse("STUCK_IN_PROGRESS_S", 600)),
            stuck_queued:      Duration::from_secs(env_parse("STUCK_QUEUED_S", 300)),

            supervisor_tick: Duration::from_secs(env_parse("SUPERVISOR_TICK_S", 3)),
            recovery_period: Duration::from_secs(env_parse("RECOVERY_PERIOD_S", 600)),

            inference_device: env::var("INFERENCE_DEVICE")
                .ok()
                .and_then(|s| match s.as_str() {
                    "cpu" => Some(InferenceDevice::Cpu),
                    "gpu" => Some(InferenceDevice::Gpu),
                    _ => None,
                })
                .unwrap_or(InferenceDevice::Cpu),
        }
    }
}

/// Parses an env var of type `T`, falling back to `default` if the variable
/// is unset or fails to parse rather than failing startup over a typo.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use config::*;

    #[test]
    fn test_env_parse_falls_back_on_missing() {
        assert_eq!(42u32, env_parse("CXR_INFER_TEST_MISSING_VAR", 42u32));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("CXR_INFER_TEST_GARBAGE_VAR", "not-a-number");
        assert_eq!(7u32, env_parse("CXR_INFER_TEST_GARBAGE_VAR", 7u32));
        std::env::remove_var("CXR_INFER_TEST_GARBAGE_VAR");
    }

    #[test]
    fn test_env_parse_reads_set_value() {
        std::env::set_var("CXR_INFER_TEST_SET_VAR", "99");
        assert_eq!(99u32, env_parse("CXR_INFER_TEST_SET_VAR", 1u32));
        std::env::remove_var("CXR_INFER_TEST_SET_VAR");
    }
}
