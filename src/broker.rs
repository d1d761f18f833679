use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::constants;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Parameter `{name}` has not been published in {region}")]
    NotPublished { name: String, region: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRegionParameter {
    pub name: String,
    pub value: String,
    pub producer: String,
    pub region: String,
    pub consumers: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRegionParameterBroker {
    parameters: BTreeMap<String, CrossRegionParameter>,
}

pub fn hosted_zone_parameter(prefix: &str) -> String {
    format!("{}{}", prefix, constants::HOSTED_ZONE_PARAMETER)
}

pub fn launcher_role_parameter(prefix: &str) -> String {
    format!("{}{}", prefix, constants::LAUNCHER_ROLE_PARAMETER)
}

impl CrossRegionParameterBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `name` in `region`. Publishing again replaces
    /// the value; consumers recorded so far are kept.
    pub fn publish(&mut self, name: &str, value: &str, producer: &str, region: &str) {
        debug!(name, producer, region, "publishing parameter");
        let consumers = self
            .parameters
            .remove(name)
            .map(|previous| previous.consumers)
            .unwrap_or_default();
        self.parameters.insert(
            name.to_string(),
            CrossRegionParameter {
                name: name.to_string(),
                value: value.to_string(),
                producer: producer.to_string(),
                region: region.to_string(),
                consumers,
            },
        );
    }

    pub fn resolve(&mut self, name: &str, region: &str, consumer: &str) -> Result<String, Error> {
        let parameter = match self.parameters.get_mut(name) {
            Some(parameter) if parameter.region == region => parameter,
            _ => {
                return Err(Error::NotPublished {
                    name: name.to_string(),
                    region: region.to_string(),
                })
            }
        };

        parameter.consumers.insert(consumer.to_string());
        debug!(name, region, consumer, "resolved parameter");
        return Ok(parameter.value.clone());
    }

    pub fn producer_of(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .map(|parameter| parameter.producer.as_str())
    }

    pub fn parameters(&self) -> impl Iterator<Item = &CrossRegionParameter> {
        self.parameters.values()
    }
}

#[cfg(test)]
mod tests {
    use super::hosted_zone_parameter;
    use super::launcher_role_parameter;
    use super::CrossRegionParameterBroker;
    use super::Error;

    #[test]
    fn publish_then_resolve() {
        let mut broker = CrossRegionParameterBroker::new();
        broker.publish("MinecraftHostedZoneID", "Z0123", "domain", "us-east-1");

        let value = broker.resolve("MinecraftHostedZoneID", "us-east-1", "server");
        assert_eq!(Ok(String::from("Z0123")), value);
        assert_eq!(Some("domain"), broker.producer_of("MinecraftHostedZoneID"));

        let parameter = broker.parameters().next().unwrap();
        assert_eq!(true, parameter.consumers.contains("server"));
    }

    #[test]
    fn resolve_before_publish() {
        let mut broker = CrossRegionParameterBroker::new();

        let result = broker.resolve("MinecraftHostedZoneID", "us-east-1", "server");
        match result.err().unwrap() {
            Error::NotPublished { name, .. } => assert_eq!("MinecraftHostedZoneID", name),
        }
    }

    #[test]
    fn empty_value_is_not_missing() {
        let mut broker = CrossRegionParameterBroker::new();
        broker.publish("LauncherLambdaRoleArn", "", "domain", "us-east-1");

        let value = broker.resolve("LauncherLambdaRoleArn", "us-east-1", "server");
        assert_eq!(Ok(String::new()), value);
    }

    #[test]
    fn parameters_are_regional() {
        let mut broker = CrossRegionParameterBroker::new();
        broker.publish("MinecraftHostedZoneID", "Z0123", "domain", "us-east-1");

        let result = broker.resolve("MinecraftHostedZoneID", "eu-west-1", "server");
        assert_eq!(true, result.is_err());
    }

    #[test]
    fn republishing_returns_latest_value() {
        let mut broker = CrossRegionParameterBroker::new();
        broker.publish("MinecraftHostedZoneID", "Z0123", "domain", "us-east-1");
        broker.resolve("MinecraftHostedZoneID", "us-east-1", "server").unwrap();
        broker.publish("MinecraftHostedZoneID", "Z4567", "domain", "us-east-1");

        let value = broker.resolve("MinecraftHostedZoneID", "us-east-1", "server");
        assert_eq!(Ok(String::from("Z4567")), value);
        assert_eq!(1, broker.parameters().next().unwrap().consumers.len());
    }

    #[test]
    fn names_are_prefixed() {
        assert_eq!("survivalMinecraftHostedZoneID", hosted_zone_parameter("survival"));
        assert_eq!("LauncherLambdaRoleArn", launcher_role_parameter(""));
    }
}
