use std::time::Duration;

use super::{process_env, ConfigError, EnvReader};
use crate::models::{StreamEntity, Symbol};

#[derive(Debug, Clone, PartialEq)]
pub struct LineLoggerSettings {
    pub broker_amqp_uri: String,
    pub mongo_uri: String,
    pub symbols: Vec<Symbol>,
    pub entities: Vec<StreamEntity>,
    pub bulk_interval: Duration,
}

impl LineLoggerSettings {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader::new(lookup);

        let bulk_interval: u64 = env.parse("BULK_INTERVAL", 10)?;
        if bulk_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "BULK_INTERVAL".into(),
                value: bulk_interval.to_string(),
            });
        }

        Ok(Self {
            broker_amqp_uri: env.required("BROKER_AMQP_URI")?,
            mongo_uri: env.required("MONGO_URI")?,
            symbols: env.symbols()?,
            entities: env.entities()?,
            bulk_interval: Duration::from_secs(bulk_interval),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lookup_from;

    #[test]
    fn test_load_with_defaults() {
        let lookup = lookup_from(&[
            ("BROKER_AMQP_URI", "amqp://localhost"),
            ("MONGO_URI", "mongodb://localhost/line"),
            ("SYMBOL", "ethusdt"),
            ("ENTITIES", "trade"),
        ]);
        let settings = LineLoggerSettings::from_lookup(&lookup).unwrap();
        assert_eq!(settings.symbols, vec!["ETHUSDT".to_string()]);
        assert_eq!(settings.entities, vec![StreamEntity::Trade]);
        assert_eq!(settings.bulk_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_bulk_interval_is_invalid() {
        let lookup = lookup_from(&[
            ("BROKER_AMQP_URI", "amqp://localhost"),
            ("MONGO_URI", "mongodb://localhost/line"),
            ("SYMBOL", "ethusdt"),
            ("BULK_INTERVAL", "0"),
        ]);
        assert!(matches!(
            LineLoggerSettings::from_lookup(&lookup),
            Err(ConfigError::Invalid { key, .. }) if key == "BULK_INTERVAL"
        ));
    }
}
