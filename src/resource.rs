use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Protocol;
use crate::policy::PolicyStatement;

pub fn reference(logical_id: &str, attribute: &str) -> String {
    format!("${{{}.{}}}", logical_id, attribute)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,

    #[serde(flatten)]
    pub spec: ResourceSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            logical_id: logical_id.into(),
            spec,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn reference(&self, attribute: &str) -> String {
        reference(&self.logical_id, attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSpec {
    LogGroup {
        log_group_name: String,
        retention_days: u32,
    },
    LogResourcePolicy {
        policy_name: String,
        statements: Vec<PolicyStatement>,
    },
    HostedZoneLookup {
        domain_name: String,
    },
    HostedZone {
        zone_name: String,
        query_logs_log_group_arn: String,
    },
    NsRecord {
        zone: String,
        record_name: String,
        values: String,
    },
    ARecord {
        zone: String,
        record_name: String,
        values: Vec<String>,
        ttl_seconds: u32,
    },
    Function {
        code: String,
        handler: String,
        runtime: String,
        environment: BTreeMap<String, String>,
        log_retention_days: u32,
    },
    FunctionPermission {
        function: String,
        principal: String,
        action: String,
        source_account: String,
        source_arn: String,
    },
    SubscriptionFilter {
        log_group: String,
        destination: String,
        filter_pattern: String,
    },
    Parameter {
        parameter_name: String,
        value: String,
        description: String,
        allowed_pattern: String,
    },
    ParameterRead {
        parameter_name: String,
        region: String,
        refresh: RefreshPolicy,
    },
    Vpc(VpcSpec),
    FileSystem {
        removal_policy: RemovalPolicy,
    },
    AccessPoint {
        file_system: String,
        path: String,
        posix_uid: String,
        posix_gid: String,
        permissions: String,
    },
    Cluster {
        cluster_name: String,
        container_insights: bool,
        fargate_capacity_providers: bool,
    },
    ClusterReference {
        cluster_name: String,
        owner_stack: String,
    },
    Role {
        assumed_by: String,
        description: String,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        managed_policies: Vec<String>,
    },
    ImportedRole {
        role_arn: String,
    },
    SecurityGroup {
        description: String,
        ingress: Vec<IngressPermission>,
    },
    SecurityGroupIngress {
        group: String,
        source_group: String,
        protocol: Protocol,
        port: u16,
        description: String,
    },
    Instance {
        instance_type: String,
        machine_image: String,
        subnet: String,
        security_group: String,
        role: String,
    },
    TaskDefinition {
        cpu: u32,
        memory_mib: u32,
        task_role: String,
        volumes: Vec<EfsVolume>,
        containers: Vec<ContainerDefinition>,
    },
    Service {
        cluster: String,
        service_name: String,
        task_definition: String,
        desired_count: u32,
        assign_public_ip: bool,
        platform_version: String,
        security_groups: Vec<String>,
        capacity_provider_strategy: Vec<CapacityProviderStrategy>,
    },
    Topic {
        display_name: String,
    },
    Subscription {
        topic: String,
        protocol: String,
        endpoint: String,
    },
    Policy {
        roles: Vec<String>,
        statements: Vec<PolicyStatement>,
    },
    Bucket {
        bucket_name: String,
        versioned: bool,
        kms_managed_encryption: bool,
        block_public_access: bool,
    },
    SyncLocationS3 {
        bucket_arn: String,
        subdirectory: String,
        access_role: String,
    },
    SyncLocationEfs {
        file_system_arn: String,
        subdirectory: String,
        subnet_arn: String,
        security_group_arns: Vec<String>,
    },
    SyncTask {
        name: String,
        source_location: String,
        destination_location: String,
        excludes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VpcSpec {
    Existing { vpc_id: String },
    New { max_azs: u32, nat_gateways: u32 },
}

/// Parameter reads pick up a fresh physical id on each deployment so the
/// latest published value is always fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    EveryDeployment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Retain,
    Snapshot,
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPermission {
    pub peer: String,
    pub protocol: Protocol,
    pub port: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfsVolume {
    pub name: String,
    pub file_system: String,
    pub access_point: String,
    pub transit_encryption: bool,
    pub iam_authorization: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDriver {
    pub stream_prefix: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub essential: bool,
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LogDriver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityProvider {
    #[serde(rename = "FARGATE")]
    Fargate,
    #[serde(rename = "FARGATE_SPOT")]
    FargateSpot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityProviderStrategy {
    pub capacity_provider: CapacityProvider,
    pub weight: u32,
}
