use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::broker::{self, CrossRegionParameter, CrossRegionParameterBroker};
use crate::builder;
use crate::config::{self, StackConfig};
use crate::graph::{self, StackDependencyGraph, StackNode};
use crate::outputs;
use crate::policy;
use crate::ssm;
use crate::writer;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Broker(#[from] broker::Error),

    #[error(transparent)]
    Graph(#[from] graph::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Builder(#[from] builder::Error),

    #[error(transparent)]
    Outputs(#[from] outputs::Error),

    #[error(transparent)]
    Ssm(#[from] ssm::Error),

    #[error(transparent)]
    Writer(#[from] writer::Error),
}

/// Everything needed to deploy: the resolved config, every stack with its
/// resources, the parameters passed between regions and the order to
/// deploy the stacks in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentPlan {
    pub config: StackConfig,
    pub graph: StackDependencyGraph,
    pub parameters: Vec<CrossRegionParameter>,
    pub order: Vec<String>,
}

impl DeploymentPlan {
    pub fn stacks_in_order(&self) -> impl Iterator<Item = &StackNode> {
        self.order.iter().filter_map(|name| self.graph.node(name))
    }
}

pub fn plan(env: &HashMap<String, String>, container_dir: Option<&Path>) -> Result<DeploymentPlan, Error> {
    let config = config::resolve(env, container_dir)?;

    let mut broker = CrossRegionParameterBroker::new();
    let builder::Blueprint { mut graph, computes } = builder::build(&config, &mut broker)?;

    for binding in &computes {
        let policies = policy::compose_compute(&binding.identifiers)?;
        debug!(
            stack = binding.stack.as_str(),
            statements = policies.task.len() + 1,
            "composed policies"
        );
        builder::attach_policies(&mut graph, binding, policies)?;
    }

    graph.validate()?;
    let order: Vec<String> = graph
        .deployment_order()?
        .into_iter()
        .map(String::from)
        .collect();
    info!(order = ?order, "planned deployment");

    return Ok(DeploymentPlan {
        config,
        graph,
        parameters: broker.parameters().cloned().collect(),
        order,
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::plan;
    use super::Error;
    use crate::config;
    use crate::resource::ResourceSpec;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn single_server_plan() {
        let plan = plan(&env(&[("DOMAIN_NAME", "example.com")]), None).unwrap();

        assert_eq!(vec!["minecraft-domain-stack", "minecraft-server-stack"], plan.order);
        assert_eq!(2, plan.graph.nodes().len());
        assert_eq!(1, plan.graph.edges().len());
        assert_eq!(2, plan.parameters.len());
        for parameter in &plan.parameters {
            assert_eq!("minecraft-domain-stack", parameter.producer);
            assert_eq!(true, parameter.consumers.contains("minecraft-server-stack"));
        }

        let compute = plan.graph.node("minecraft-server-stack").unwrap();
        match &compute.resource("ServiceControlPolicy").unwrap().spec {
            ResourceSpec::Policy { roles, statements } => {
                assert_eq!(vec!["TaskRole", "LauncherLambdaRole"], *roles);
                assert_eq!(1, statements.len());
            }
            _ => panic!("Expected a policy"),
        }
        match &compute.resource("TaskPolicy").unwrap().spec {
            ResourceSpec::Policy { roles, statements } => {
                assert_eq!(vec!["TaskRole"], *roles);
                assert_eq!(2, statements.len());
            }
            _ => panic!("Expected a policy"),
        }
        match &compute.resource("DataReadWritePolicy").unwrap().spec {
            ResourceSpec::Policy { roles, .. } => assert_eq!(vec!["TaskRole"], *roles),
            _ => panic!("Expected a policy"),
        }
    }

    #[test]
    fn work_instance_shares_data_access() {
        let env = env(&[("DOMAIN_NAME", "example.com"), ("ENABLE_WORK_INSTANCE", "true")]);
        let plan = plan(&env, None).unwrap();

        let compute = plan.graph.node("minecraft-server-stack").unwrap();
        assert_eq!(true, compute.resource("WorkInstance").is_some());
        match &compute.resource("DataReadWritePolicy").unwrap().spec {
            ResourceSpec::Policy { roles, .. } => {
                assert_eq!(vec!["TaskRole", "WorkInstanceRole"], *roles)
            }
            _ => panic!("Expected a policy"),
        }
    }

    #[test]
    fn missing_domain_name_plans_nothing() {
        let result = plan(&env(&[("DOMAIN_NAME", "")]), None);
        match result.err().unwrap() {
            Error::Config(config::Error::MissingDomainName) => {}
            _ => panic!("Expected `MissingDomainName` error"),
        }
    }

    #[test]
    fn one_compute_stack_per_definition_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("creative.yaml"), "PREFIX: creative\nSUBDOMAIN_PART: creative\nSERVICE_NAME: creative\n").unwrap();
        fs::write(dir.path().join("survival.yaml"), "PREFIX: survival\nSUBDOMAIN_PART: survival\nSERVICE_NAME: survival\n").unwrap();
        fs::write(
            dir.path().join("pocket.yaml"),
            "PREFIX: pocket\nSUBDOMAIN_PART: pocket\nMINECRAFT_EDITION: bedrock\nCLUSTER_NAME: pocket\n",
        )
        .unwrap();

        let plan = plan(&env(&[("DOMAIN_NAME", "example.com")]), Some(dir.path())).unwrap();

        assert_eq!(4, plan.graph.nodes().len());
        assert_eq!("minecraft-domain-stack", plan.order[0]);
        // creative declares the shared cluster, survival follows it.
        let creative = plan.order.iter().position(|name| name == "creative-minecraft-server-stack");
        let survival = plan.order.iter().position(|name| name == "survival-minecraft-server-stack");
        assert_eq!(true, creative < survival);
        assert_eq!(6, plan.parameters.len());
    }

    #[test]
    fn servers_sharing_a_name_plan_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "PREFIX: a\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "PREFIX: b\n").unwrap();

        let result = plan(&env(&[("DOMAIN_NAME", "example.com")]), Some(dir.path()));
        match result.err().unwrap() {
            Error::Config(config::Error::DuplicateServerName(name)) => {
                assert_eq!("minecraft.example.com", name)
            }
            _ => panic!("Expected `DuplicateServerName` error"),
        }
    }

    #[test]
    fn planning_is_repeatable() {
        let env = env(&[
            ("DOMAIN_NAME", "example.com"),
            ("SERVER_REGION", "eu-central-1"),
            ("SNS_EMAIL_ADDRESS", "ops@example.com"),
        ]);

        let first = plan(&env, None).unwrap();
        let second = plan(&env, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(2, first.stacks_in_order().count());
    }
}
