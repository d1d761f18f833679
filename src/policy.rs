use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arn::{self, ArnComponents, Scope};

/// Actions without a narrower resource format; the only ones allowed on `*`.
pub const UNSCOPED_ACTIONS: [&str; 2] = ["ec2:DescribeNetworkInterfaces", "route53:ListHostedZones"];

const ANY_RESOURCE: &str = "*";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Actions {0:?} cannot be granted on every resource")]
    UnscopedResource(Vec<String>),

    #[error("A policy statement needs at least one action and one resource")]
    EmptyStatement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "Service")]
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    #[serde(rename = "Action")]
    pub actions: Vec<String>,

    #[serde(rename = "Resource")]
    pub resources: Vec<String>,

    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, BTreeMap<String, String>>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<String>) -> Result<Self, Error> {
        if actions.is_empty() || resources.is_empty() {
            return Err(Error::EmptyStatement);
        }

        let unscoped = resources.iter().any(|resource| resource == ANY_RESOURCE);
        let scopable: Vec<String> = actions
            .iter()
            .filter(|action| !UNSCOPED_ACTIONS.contains(*action))
            .map(|action| action.to_string())
            .collect();
        if unscoped && !scopable.is_empty() {
            return Err(Error::UnscopedResource(scopable));
        }

        return Ok(Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|action| action.to_string()).collect(),
            resources,
            conditions: BTreeMap::new(),
        });
    }

    pub fn with_sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    pub fn with_service_principal(mut self, service: &str) -> Self {
        self.principal = Some(Principal {
            service: service.to_string(),
        });
        self
    }

    pub fn with_condition(mut self, operator: &str, key: &str, value: &str) -> Self {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_unscoped(&self) -> bool {
        self.resources.iter().any(|resource| resource == ANY_RESOURCE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeIdentifiers {
    pub scope: Scope,
    pub cluster_name: String,
    pub service_name: String,
    pub hosted_zone_id: String,
    pub file_system_id: String,
    pub access_point_id: String,
    pub topic_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePolicies {
    pub service_control: PolicyStatement,
    pub data_read_write: PolicyStatement,
    pub task: Vec<PolicyStatement>,
}

pub fn service_arn(ids: &ComputeIdentifiers) -> String {
    let name = format!("{}/{}", ids.cluster_name, ids.service_name);
    arn::format(&ArnComponents::new("ecs", "service").slash(&name), &ids.scope)
}

pub fn file_system_arn(ids: &ComputeIdentifiers) -> String {
    arn::format(
        &ArnComponents::new("elasticfilesystem", "file-system").slash(&ids.file_system_id),
        &ids.scope,
    )
}

pub fn access_point_arn(ids: &ComputeIdentifiers) -> String {
    arn::format(
        &ArnComponents::new("elasticfilesystem", "access-point").slash(&ids.access_point_id),
        &ids.scope,
    )
}

pub fn service_control(ids: &ComputeIdentifiers) -> Result<PolicyStatement, Error> {
    let tasks = format!("{}/*", ids.cluster_name);
    let statement = PolicyStatement::allow(
        &["ecs:*"],
        vec![
            service_arn(ids),
            arn::format(&ArnComponents::new("ecs", "task").slash(&tasks), &ids.scope),
        ],
    )?;

    return Ok(statement.with_sid("AllowAllOnServiceAndTask"));
}

pub fn data_read_write(ids: &ComputeIdentifiers) -> Result<PolicyStatement, Error> {
    let statement = PolicyStatement::allow(
        &[
            "elasticfilesystem:ClientMount",
            "elasticfilesystem:ClientWrite",
            "elasticfilesystem:DescribeFileSystems",
        ],
        vec![file_system_arn(ids)],
    )?;

    return Ok(statement.with_sid("AllowReadWriteOnEFS").with_condition(
        "StringEquals",
        "elasticfilesystem:AccessPointArn",
        &access_point_arn(ids),
    ));
}

pub fn managed_policy_arn(name: &str, scope: &Scope) -> String {
    let aws_owned = Scope::new(&scope.region, Some("aws"));
    arn::format(&ArnComponents::new("iam", "policy").slash(name), &aws_owned)
}

pub fn compose_compute(ids: &ComputeIdentifiers) -> Result<ComputePolicies, Error> {
    let mut task = vec![
        PolicyStatement::allow(
            &["ec2:DescribeNetworkInterfaces"],
            vec![ANY_RESOURCE.to_string()],
        )?,
        PolicyStatement::allow(
            &[
                "route53:GetHostedZone",
                "route53:ChangeResourceRecordSets",
                "route53:ListResourceRecordSets",
            ],
            vec![arn::format(
                &ArnComponents::new("route53", "hostedzone").slash(&ids.hosted_zone_id),
                &ids.scope,
            )],
        )?
        .with_sid("AllowEditRecordSets"),
    ];

    if let Some(topic_arn) = &ids.topic_arn {
        task.push(PolicyStatement::allow(&["sns:Publish"], vec![topic_arn.clone()])?);
    }

    return Ok(ComputePolicies {
        service_control: service_control(ids)?,
        data_read_write: data_read_write(ids)?,
        task,
    });
}

pub fn dns_query_logging(scope: &Scope) -> Result<PolicyStatement, Error> {
    let statement = PolicyStatement::allow(
        &["logs:CreateLogStream", "logs:PutLogEvents"],
        vec![arn::format(
            &ArnComponents::new("logs", "log-group").colon("*"),
            scope,
        )],
    )?;

    return Ok(statement
        .with_sid("AllowR53LogToCloudwatch")
        .with_service_principal("route53.amazonaws.com"));
}

pub fn file_sync(bucket_name: &str, scope: &Scope) -> Result<Vec<PolicyStatement>, Error> {
    let bucket_arn = arn::format(&ArnComponents::new("s3", bucket_name), scope);
    let objects = format!("{}/*", bucket_name);
    let objects_arn = arn::format(&ArnComponents::new("s3", &objects), scope);

    return Ok(vec![
        PolicyStatement::allow(
            &[
                "s3:GetBucketLocation",
                "s3:ListBucket",
                "s3:ListBucketMultipartUploads",
            ],
            vec![bucket_arn],
        )?,
        PolicyStatement::allow(
            &[
                "s3:AbortMultipartUpload",
                "s3:DeleteObject",
                "s3:GetObject",
                "s3:ListMultipartUploadParts",
                "s3:PutObjectTagging",
                "s3:GetObjectTagging",
                "s3:PutObject",
            ],
            vec![objects_arn],
        )?,
    ]);
}
