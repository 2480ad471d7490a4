//! Provider selection (§4.2): explicit name → credential presence → `None`
//! (caller falls back to Historical Replay / Mock). Grounded on the original
//! `get_provider()` fallback chain (explicit name → env override →
//! credential auto-detect → `None`), translated to explicit config instead
//! of ambient environment reads (§9).

use std::sync::Arc;

use crate::config::Config;

use super::{LiveProvider, Provider};

/// Mirrors the original's `get_provider(name)`: an explicit name always
/// wins; otherwise credentials in `config.provider` are probed; otherwise
/// `None`, signalling "use historical replay / mock at the caller".
pub fn select_provider(config: &Config, explicit_name: Option<&str>) -> Option<Arc<dyn Provider>> {
    if let Some(name) = explicit_name {
        return build_named(config, name);
    }

    if let Some(name) = config.provider.name.clone() {
        if let Some(p) = build_named(config, &name) {
            return Some(p);
        }
    }

    build_from_credentials(config)
}

fn build_named(config: &Config, name: &str) -> Option<Arc<dyn Provider>> {
    match name {
        "live" => build_from_credentials(config),
        _ => None,
    }
}

fn build_from_credentials(config: &Config) -> Option<Arc<dyn Provider>> {
    let api_key = config.provider.live_api_key.clone()?;
    let base_url = config.provider.live_base_url.clone()?;
    Some(Arc::new(LiveProvider::new(
        config.instrument.exchange.clone(),
        base_url,
        api_key,
    )))
}
