use anyhow::Context;
use sovledger_core::Config;
use std::env;
use std::path::PathBuf;

/// Load the node configuration.
///
/// The TOML file named by `SOVLEDGER_CONFIG` is optional; `SOVLEDGER_DB`,
/// `SOVLEDGER_LISTEN` and `REDIS_URL` override it when set.
pub fn load() -> anyhow::Result<Config> {
    let mut config = match env::var("SOVLEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        Err(_) => Config::default_config(),
    };

    apply_overrides(&mut config, |key| env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(path) = var("SOVLEDGER_DB") {
        config.ledger.path = PathBuf::from(path);
    }
    if let Some(addr) = var("SOVLEDGER_LISTEN") {
        config.service.listen_addr = addr;
    }
    if let Some(url) = var("REDIS_URL").filter(|u| !u.is_empty()) {
        config.redis.url = Some(url);
    }
}
