use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::outputs::Outputs;
use crate::plan::DeploymentPlan;

pub const PLAN_FILE: &str = "plan.json";
pub const ORDER_FILE: &str = "deploy-order.txt";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to write {path}: {reason}")]
    WriteError { path: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

pub fn render(plan: &DeploymentPlan, format: Format) -> Result<String, Error> {
    let rendered = match format {
        Format::Json => serde_json::to_string_pretty(plan).map_err(|error| error.to_string()),
        Format::Yaml => serde_yaml::to_string(plan).map_err(|error| error.to_string()),
    };

    match rendered {
        Ok(contents) => Ok(contents),
        Err(reason) => Err(Error::SerializationError(reason)),
    }
}

/// Writes the whole plan, one file per stack and the deployment order into
/// `out`. Returns the written paths.
pub fn write(plan: &DeploymentPlan, out: &Path) -> Result<Vec<PathBuf>, Error> {
    create_dir(out)?;

    let mut written = Vec::with_capacity(plan.order.len() + 2);
    written.push(write_file(&out.join(PLAN_FILE), &render(plan, Format::Json)?)?);

    for node in plan.stacks_in_order() {
        let contents = match serde_json::to_string_pretty(node) {
            Ok(contents) => contents,
            Err(error) => return Err(Error::SerializationError(error.to_string())),
        };
        written.push(write_file(&out.join(format!("{}.json", node.name)), &contents)?);
    }

    let order = plan.order.iter().fold(String::new(), |mut acc, name| {
        acc.push_str(name);
        acc.push('\n');
        acc
    });
    written.push(write_file(&out.join(ORDER_FILE), &order)?);

    info!(path = ?out, files = written.len(), "wrote plan");
    return Ok(written);
}

/// Flattens stack outputs into `{ "<stack>.<key>": value }` and writes them as
/// JSON.
pub fn write_outputs(path: &Path, outputs: &BTreeMap<String, Outputs>) -> Result<(), Error> {
    let flat: BTreeMap<String, &str> = outputs
        .iter()
        .flat_map(|(stack, outputs)| {
            outputs
                .iter()
                .map(move |(key, value)| (format!("{}.{}", stack, key), value.as_str()))
        })
        .collect();

    let contents = match serde_json::to_string_pretty(&flat) {
        Ok(contents) => contents,
        Err(error) => return Err(Error::SerializationError(error.to_string())),
    };
    write_file(path, &contents)?;

    return Ok(());
}

fn create_dir(path: &Path) -> Result<(), Error> {
    match fs::create_dir_all(path) {
        Ok(_) => Ok(()),
        Err(error) => Err(Error::WriteError {
            path: path.display().to_string(),
            reason: error.to_string(),
        }),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<PathBuf, Error> {
    match fs::write(path, contents) {
        Ok(_) => Ok(path.to_path_buf()),
        Err(error) => Err(Error::WriteError {
            path: path.display().to_string(),
            reason: error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::fs;

    use super::render;
    use super::write;
    use super::write_outputs;
    use super::Format;
    use crate::plan::plan;
    use tempfile::tempdir;

    fn example_plan() -> crate::plan::DeploymentPlan {
        let env = HashMap::from([(String::from("DOMAIN_NAME"), String::from("example.com"))]);
        plan(&env, None).unwrap()
    }

    #[test]
    fn writes_plan_stacks_and_order() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("cdk.out");

        let written = write(&example_plan(), &out).unwrap();
        assert_eq!(4, written.len());

        let order = fs::read_to_string(out.join("deploy-order.txt")).unwrap();
        assert_eq!("minecraft-domain-stack\nminecraft-server-stack\n", order);

        let stack: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("minecraft-server-stack.json")).unwrap()).unwrap();
        assert_eq!("compute", stack["kind"]);
        assert_eq!("us-east-1", stack["region"]);

        let plan: serde_json::Value = serde_json::from_str(&fs::read_to_string(out.join("plan.json")).unwrap()).unwrap();
        assert_eq!("example.com", plan["config"]["global"]["domain_name"]);
    }

    #[test]
    fn renders_yaml() {
        let rendered = render(&example_plan(), Format::Yaml).unwrap();
        assert_eq!(true, rendered.contains("minecraft-domain-stack"));
        assert_eq!(true, rendered.contains("type: service"));
    }

    #[test]
    fn writes_flattened_outputs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outputs.json");
        let outputs = BTreeMap::from([(
            String::from("minecraft-domain-stack"),
            BTreeMap::from([(String::from("HostedZoneId"), String::from("Z0123"))]),
        )]);

        write_outputs(&path, &outputs).unwrap();

        let contents: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!("Z0123", contents["minecraft-domain-stack.HostedZoneId"]);
    }
}
