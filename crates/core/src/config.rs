//! Process-level configuration: logger setup and controller config loading.

use std::path::Path;

use crate::cc::{BeliefConfig, ConfigError, ControlLaw};

/// Install the global `tracing` subscriber. Later calls are no-ops.
///
/// `RUST_LOG` directives are honoured on top of `level`.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::{AtomicBool, Ordering};

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(err) = tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}

#[cfg(feature = "trace")]
mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::util::SubscriberInitExt;

    pub(super) fn init_tracer(
        level: Option<LevelFilter>,
    ) -> Result<(), tracing_subscriber::util::TryInitError> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let default_filter = level.unwrap_or(default_filter);
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env_lossy();

        let to_stderr = std::env::var("BELIEFCC_LOG_TO_STDERR").is_ok();
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter_layer)
            .with_level(true)
            .with_target(true);
        if to_stderr {
            builder.with_writer(std::io::stderr).finish().try_init()
        } else {
            builder.finish().try_init()
        }
    }
}

/// Resolve the controller config from an optional TOML file and an optional
/// control-law override.
pub fn load_belief_config(
    path: Option<&Path>,
    law: Option<ControlLaw>,
) -> Result<BeliefConfig, ConfigError> {
    let mut config = match path {
        Some(path) => BeliefConfig::load(path)?,
        None => BeliefConfig::default(),
    };
    if let Some(law) = law {
        config.control_law = law;
    }
    config.validate()?;
    tracing::debug!(?config, "Loaded controller config");
    Ok(config)
}
