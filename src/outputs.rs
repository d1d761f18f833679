use aws_config::meta::region::RegionProviderChain;
use aws_sdk_cloudformation::Region;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::graph::StackNode;
use crate::plan::DeploymentPlan;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack {0} not found")]
    NotFoundError(String),

    #[error("No region configured for stack {0}")]
    MissingRegion(String),
}

/// Outputs of one deployed stack, keyed by output name.
pub type Outputs = BTreeMap<String, String>;

pub struct Stack {
    pub stack_name: String,

    client: aws_sdk_cloudformation::Client,
}

impl Stack {
    pub async fn new(stack_name: &str, region: Option<&str>) -> Result<Self, Error> {
        let region = RegionProviderChain::first_try(region.map(|region| Region::new(region.to_string())))
            .or_default_provider()
            .region()
            .await;
        let region = match region {
            Some(region) => region,
            None => return Err(Error::MissingRegion(stack_name.to_string())),
        };

        let sdk_config = aws_config::from_env().region(region).load().await;
        let client = aws_sdk_cloudformation::Client::new(&sdk_config);

        return Ok(Self {
            stack_name: stack_name.to_string(),
            client,
        });
    }

    pub async fn get_outputs(&self) -> Result<Outputs, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(aws_sdk_cloudformation::types::SdkError::ServiceError { err, .. }) => {
                let message = err.to_string();
                if is_missing_stack(&message) {
                    return Err(Error::NotFoundError(self.stack_name.clone()));
                }
                return Err(Error::ServiceError(message));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        let stack = match result.stacks().unwrap_or_default().first() {
            Some(stack) => stack,
            None => return Err(Error::NotFoundError(self.stack_name.clone())),
        };

        return Ok(to_outputs(stack.outputs().unwrap_or_default()));
    }
}

/// Outputs of every planned stack that has been deployed. Stacks are queried
/// concurrently; ones that do not exist yet are left out.
pub async fn collect(plan: &DeploymentPlan) -> Result<BTreeMap<String, Outputs>, Error> {
    let lookups = plan.stacks_in_order().map(deployed_outputs);

    let deployed: BTreeMap<String, Outputs> = try_join_all(lookups).await?.into_iter().flatten().collect();
    info!(
        planned = plan.order.len(),
        deployed = deployed.len(),
        "collected stack outputs"
    );

    return Ok(deployed);
}

async fn deployed_outputs(node: &StackNode) -> Result<Option<(String, Outputs)>, Error> {
    let stack = Stack::new(&node.name, Some(node.region.as_str())).await?;
    match stack.get_outputs().await {
        Ok(outputs) => Ok(Some((node.name.clone(), outputs))),
        Err(Error::NotFoundError(name)) => {
            debug!(stack = name.as_str(), "stack is not deployed");
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

// CloudFormation reports a missing stack as a validation error.
fn is_missing_stack(message: &str) -> bool {
    message.contains("does not exist")
}

fn to_outputs(outputs: &[aws_sdk_cloudformation::model::Output]) -> Outputs {
    outputs.iter().fold(Outputs::new(), |mut acc, output| {
        if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
            acc.insert(key.to_string(), value.to_string());
        }
        acc
    })
}
