//! Loading the site configuration (settings overrides + initial questions) from TOML.
//!
//! See `SiteConfig` for the expected schema. Everything is optional; a missing
//! file means a fresh site with the built-in example questions.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Settings;

/// Example:
///
/// ```toml
/// [settings]
/// accepting = true
/// site_title = "r/example applications"
/// min_karma = 50
/// min_age = 2592000
/// destination_id = "r/example_mods"
///
/// [[questions]]
/// text = "Why do you want to join?"
/// type = "textarea"
/// validators = { required = true, min = 20 }
/// ```
#[derive(Clone, Debug, Deserialize, Default)]
pub struct SiteConfig {
  /// Overrides on top of `Settings::default()`; unspecified keys keep their defaults.
  #[serde(default)]
  pub settings: Option<Settings>,
  /// Raw question records, sanitized at startup like a moderator upload.
  #[serde(default)]
  pub questions: Option<Vec<serde_json::Value>>,
}

/// Attempt to load `SiteConfig` from SITE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_site_config_from_env() -> Option<SiteConfig> {
  let path = std::env::var("SITE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_site_config(&s) {
      Ok(cfg) => {
        info!(target: "gateform", %path, "Loaded site config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "gateform", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "gateform", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_site_config(s: &str) -> Result<SiteConfig, toml::de::Error> {
  toml::from_str::<SiteConfig>(s)
}
