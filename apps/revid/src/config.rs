// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered configuration loading: [`revid_core::config::SessionConfig`]'s
//! defaults, overridden by a TOML file, overridden by `REVID_`-prefixed
//! environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use revid_core::config::SessionConfig;

/// The outcome of [`load`]: the merged configuration, and whether the
/// requested file was missing (not an error — defaults apply instead).
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: SessionConfig,
    pub file_missing: Option<String>,
}

/// Loads a [`SessionConfig`] from defaults, `config_path` if it exists, and
/// `REVID_`-prefixed environment variables, in that precedence order.
///
/// # Errors
/// Returns a [`figment::Error`] if the file contains invalid TOML, or an
/// environment override can't be coerced into its field's type.
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment = Figment::new().merge(Serialized::defaults(SessionConfig::default()));

    let mut file_missing = None;
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: SessionConfig =
        figment.merge(Env::prefixed("REVID_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Renders [`SessionConfig::default`] as pretty-printed TOML, for the
/// `print-default-config` subcommand.
///
/// # Errors
/// Returns an error if the default configuration cannot be serialized;
/// unreachable in practice since every field has a plain serde mapping.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&SessionConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let result = load("/nonexistent/revid.toml").unwrap();
        assert_eq!(result.config.frame_rate, 25);
        assert_eq!(result.file_missing.as_deref(), Some("/nonexistent/revid.toml"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revid.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "frame_rate = 10").unwrap();

        let result = load(path.to_str().unwrap()).unwrap();
        assert_eq!(result.config.frame_rate, 10);
        assert!(result.file_missing.is_none());
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        // figment::Jail sandboxes the env vars it sets to the closure, so
        // this never touches the real process environment.
        figment::Jail::expect_with(|jail| {
            jail.create_file("revid.toml", "frame_rate = 10\n")?;
            jail.set_env("REVID_FRAME_RATE", "5");

            let result = load("revid.toml").unwrap();
            assert_eq!(result.config.frame_rate, 5);
            Ok(())
        });
    }
}
