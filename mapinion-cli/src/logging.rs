use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Фильтр из `RUST_LOG`, иначе из `default_level`, иначе `info`.
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Логи идут в stderr, чтобы не смешиваться с выводом команд.
pub fn init_logging(default_level: &str) -> Result<()> {
    fmt()
        .with_env_filter(build_filter(default_level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(())
}
