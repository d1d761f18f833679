use aws_sdk_ssm::Region;
use futures::future::try_join_all;
use tracing::debug;

use crate::broker::{self, CrossRegionParameter};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Missing(#[from] broker::Error),

    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),
}

pub struct ParameterStore {
    pub region: String,

    client: aws_sdk_ssm::Client,
}

impl ParameterStore {
    pub async fn new(region: &str) -> Self {
        let sdk_config = aws_config::from_env()
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ssm::Client::new(&sdk_config);

        return Self {
            region: region.to_string(),
            client,
        };
    }

    pub async fn get(&self, name: &str) -> Result<String, Error> {
        let result = self.client.get_parameter().name(name).send().await;

        let result = match result {
            Ok(data) => data,
            Err(aws_sdk_ssm::types::SdkError::ServiceError { err, .. }) => {
                if err.is_parameter_not_found() {
                    return Err(self.not_published(name));
                }
                return Err(Error::ServiceError(err.to_string()));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        let value = match result.parameter() {
            Some(parameter) => parameter.value().unwrap_or_default(),
            None => return Err(self.not_published(name)),
        };
        debug!(name, region = self.region.as_str(), "read parameter");

        return Ok(value.to_string());
    }

    fn not_published(&self, name: &str) -> Error {
        Error::Missing(broker::Error::NotPublished {
            name: name.to_string(),
            region: self.region.clone(),
        })
    }
}

/// Reads every parameter from the region it was published in.
pub async fn read_all(parameters: &[CrossRegionParameter]) -> Result<Vec<(String, String)>, Error> {
    return try_join_all(parameters.iter().map(read)).await;
}

async fn read(parameter: &CrossRegionParameter) -> Result<(String, String), Error> {
    let store = ParameterStore::new(&parameter.region).await;
    let value = store.get(&parameter.name).await?;
    return Ok((parameter.name.clone(), value));
}
