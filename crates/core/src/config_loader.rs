use std::path::Path;

use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default TOML path, `STRADDLE_` environment
    /// variables and the optional JSON overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the strategy
    /// section fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// Missing files are not an error; every section falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the strategy
    /// section fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let figment = Self::base()
            .merge(Toml::file(path))
            .merge(Self::env())
            .join(Json::file(path.with_extension("json")));
        Self::extract(&figment, path)
    }

    /// Loads configuration with a profile overlay (`Config.<profile>.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the strategy
    /// section fails validation.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let figment = Self::base()
            .merge(Toml::file(path))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Self::env())
            .join(Json::file(path.with_extension("json")));
        Self::extract(&figment, path)
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    fn env() -> Env {
        Env::prefixed("STRADDLE_").split("__")
    }

    fn extract(figment: &Figment, path: &Path) -> Result<AppConfig> {
        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.strategy.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("config/Config.toml").unwrap();
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn toml_overrides_strategy_section() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [instance]
                instance_id = "banknifty-jodi"
                symbol = "BANKNIFTY"

                [strategy]
                offset = "20"
                threshold = "25"
                adjustment_points = "5"
                "#,
            )?;

            let config = ConfigLoader::load().unwrap();
            assert_eq!(config.instance.symbol, "BANKNIFTY");
            assert_eq!(config.strategy.offset, dec!(20));
            assert_eq!(config.strategy.threshold, dec!(25));
            assert_eq!(config.strategy.adjustment_points, dec!(5));
            assert_eq!(config.strategy.strike_interval, dec!(100));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("straddle.toml", "[strategy]\noffset = \"20\"\n")?;
            jail.set_env("STRADDLE_STRATEGY__OFFSET", "30");

            let config = ConfigLoader::load_from("straddle.toml").unwrap();
            assert_eq!(config.strategy.offset, dec!(30));
            Ok(())
        });
    }

    #[test]
    fn invalid_strategy_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[strategy]\nstrike_interval = \"0\"\n")?;

            let err = ConfigLoader::load_from("bad.toml").unwrap_err();
            assert!(err.to_string().contains("strike_interval"));
            Ok(())
        });
    }
}
