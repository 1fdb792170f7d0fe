use super::{process_env, ConfigError, EnvReader};
use crate::models::Symbol;

#[derive(Debug, Clone, PartialEq)]
pub struct LineSettings {
    pub broker_amqp_uri: String,
    pub symbols: Vec<Symbol>,
    pub binance_testnet: bool,
}

impl LineSettings {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader::new(lookup);
        Ok(Self {
            broker_amqp_uri: env.required("BROKER_AMQP_URI")?,
            symbols: env.symbols()?,
            binance_testnet: env.flag("BINANCE_TESTNET", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lookup_from;

    #[test]
    fn test_load() {
        let lookup = lookup_from(&[
            ("BROKER_AMQP_URI", "amqp://localhost"),
            ("SYMBOLS", "BTCUSDT, dotusdt"),
            ("BINANCE_TESTNET", "true"),
        ]);
        let settings = LineSettings::from_lookup(&lookup).unwrap();
        assert_eq!(settings.symbols, vec!["BTCUSDT".to_string(), "DOTUSDT".to_string()]);
        assert!(settings.binance_testnet);
    }
}
