use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::arn::{self, ArnComponents, Scope};
use crate::broker::{self, CrossRegionParameterBroker};
use crate::config::{ContainerConfig, GlobalConfig, IngressRule, Protocol, StackConfig};
use crate::constants;
use crate::graph::{self, StackDependencyGraph, StackKind, StackNode};
use crate::policy::{self, ComputeIdentifiers, ComputePolicies};
use crate::resource::{
    CapacityProvider, CapacityProviderStrategy, ContainerDefinition, EfsVolume,
    IngressPermission, LogDriver, MountPoint, PortMapping, RefreshPolicy, RemovalPolicy,
    Resource, ResourceSpec, VpcSpec,
};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] graph::Error),

    #[error(transparent)]
    Broker(#[from] broker::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error("Prefix `{0}` is used by more than one container config")]
    DuplicatePrefix(String),

    #[error("Fargate spot percentage {0} is outside of 0-100")]
    SpotPercentageOutOfRange(i64),

    #[error("File sync for `{prefix}` cannot be declared: {reason}")]
    FileSyncPrecondition { prefix: String, reason: String },

    #[error("Work instance for `{prefix}` cannot be declared: {reason}")]
    WorkInstancePrecondition { prefix: String, reason: String },
}

const NO_PUBLIC_SUBNET: &str = "the VPC needs at least one public subnet, set PUBLIC_SUBNET_IDS";

/// Split of the service's capacity between FARGATE and FARGATE_SPOT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityWeights {
    pub on_demand: u32,
    pub spot: u32,
}

impl CapacityWeights {
    pub fn split(spot_percentage: i64) -> Result<Self, Error> {
        let spot = match u32::try_from(spot_percentage) {
            Ok(spot) if spot <= 100 => spot,
            _ => return Err(Error::SpotPercentageOutOfRange(spot_percentage)),
        };

        return Ok(Self {
            on_demand: 100 - spot,
            spot,
        });
    }

    pub fn strategy(&self) -> Vec<CapacityProviderStrategy> {
        vec![
            CapacityProviderStrategy {
                capacity_provider: CapacityProvider::Fargate,
                weight: self.on_demand,
            },
            CapacityProviderStrategy {
                capacity_provider: CapacityProvider::FargateSpot,
                weight: self.spot,
            },
        ]
    }
}

pub fn compute_stack_name(prefix: &str) -> String {
    if prefix.is_empty() {
        constants::COMPUTE_STACK_SUFFIX.to_string()
    } else {
        format!("{}-{}", prefix, constants::COMPUTE_STACK_SUFFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeBinding {
    pub stack: String,
    pub prefix: String,
    pub task_role: String,
    pub launcher_role: String,
    pub work_instance_role: Option<String>,
    pub identifiers: ComputeIdentifiers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub graph: StackDependencyGraph,
    pub computes: Vec<ComputeBinding>,
}

pub fn build(config: &StackConfig, broker: &mut CrossRegionParameterBroker) -> Result<Blueprint, Error> {
    let mut prefixes = HashSet::new();
    for container in &config.containers {
        if !prefixes.insert(container.prefix.as_str()) {
            return Err(Error::DuplicatePrefix(container.prefix.clone()));
        }
    }

    let mut graph = StackDependencyGraph::new();
    graph.add_node(domain_stack(config, broker)?)?;

    let mut cluster_owners: HashMap<String, String> = HashMap::new();
    let mut computes = Vec::with_capacity(config.containers.len());
    for container in &config.containers {
        let stack = compute_stack_name(&container.prefix);
        let owner = cluster_owners.get(&container.cluster_name).cloned();

        let (node, binding) = compute_stack(&stack, container, &config.global, owner.as_deref(), broker)?;
        graph.add_node(node)?;

        let reads = [
            broker::hosted_zone_parameter(&container.prefix),
            broker::launcher_role_parameter(&container.prefix),
        ];
        for name in &reads {
            if let Some(producer) = broker.producer_of(name) {
                graph.add_edge(&stack, producer, &format!("reads {}", name))?;
            }
        }

        match owner {
            Some(owner) => {
                graph.add_edge(&stack, &owner, &format!("shares cluster {}", container.cluster_name))?
            }
            None => {
                cluster_owners.insert(container.cluster_name.clone(), stack.clone());
            }
        }

        computes.push(binding);
    }

    info!(
        stacks = graph.nodes().len(),
        edges = graph.edges().len(),
        "built stack graph"
    );
    return Ok(Blueprint { graph, computes });
}

/// Service control goes on the task and launcher roles, data access on the task
/// and work instance roles, everything else on the task role only.
pub fn attach_policies(
    graph: &mut StackDependencyGraph,
    binding: &ComputeBinding,
    policies: ComputePolicies,
) -> Result<(), Error> {
    let node = match graph.node_mut(&binding.stack) {
        Some(node) => node,
        None => return Err(graph::Error::UnknownStack(binding.stack.clone()).into()),
    };

    node.add(Resource::new(
        "ServiceControlPolicy",
        ResourceSpec::Policy {
            roles: vec![binding.task_role.clone(), binding.launcher_role.clone()],
            statements: vec![policies.service_control],
        },
    ));
    node.add(Resource::new(
        "TaskPolicy",
        ResourceSpec::Policy {
            roles: vec![binding.task_role.clone()],
            statements: policies.task,
        },
    ));

    let mut data_roles = vec![binding.task_role.clone()];
    data_roles.extend(binding.work_instance_role.clone());
    node.add(Resource::new(
        "DataReadWritePolicy",
        ResourceSpec::Policy {
            roles: data_roles,
            statements: vec![policies.data_read_write],
        },
    ));
    return Ok(());
}

fn domain_stack(config: &StackConfig, broker: &mut CrossRegionParameterBroker) -> Result<StackNode, Error> {
    let global = &config.global;
    let scope = Scope::new(constants::DOMAIN_STACK_REGION, global.account.as_deref());
    let mut node = StackNode::new(
        constants::DOMAIN_STACK_NAME,
        StackKind::Domain,
        constants::DOMAIN_STACK_REGION,
    );

    let root_zone = node.add(Resource::new(
        "HostedZone",
        ResourceSpec::HostedZoneLookup {
            domain_name: global.domain_name.clone(),
        },
    ));
    let log_policy = node.add(Resource::new(
        "CloudwatchLogResourcePolicy",
        ResourceSpec::LogResourcePolicy {
            policy_name: constants::DNS_LOGGING_POLICY_NAME.to_string(),
            statements: vec![policy::dns_query_logging(&scope)?],
        },
    ));

    for container in &config.containers {
        let prefix = container.prefix.as_str();
        let subdomain = container.server_name(global);

        let log_group = Resource::new(
            format!("{}QueryLogGroup", prefix),
            ResourceSpec::LogGroup {
                log_group_name: format!("/aws/route53/{}", subdomain),
                retention_days: constants::LOG_RETENTION_DAYS,
            },
        );
        let log_group_arn = log_group.reference("Arn");
        let log_group_id = node.add(log_group);

        // Route53 refuses to enable query logging without the resource policy.
        let zone = Resource::new(
            format!("{}SubdomainHostedZone", prefix),
            ResourceSpec::HostedZone {
                zone_name: subdomain.clone(),
                query_logs_log_group_arn: log_group_arn.clone(),
            },
        )
        .after(log_policy.as_str())
        .after(root_zone.as_str());
        let zone_id = zone.reference("Id");
        let name_servers = zone.reference("NameServers");
        let zone_logical_id = node.add(zone);

        node.add(Resource::new(
            format!("{}NSRecord", prefix),
            ResourceSpec::NsRecord {
                zone: root_zone.clone(),
                record_name: subdomain.clone(),
                values: name_servers,
            },
        ));
        // Updated by the watchdog every time the server starts.
        node.add(
            Resource::new(
                format!("{}ARecord", prefix),
                ResourceSpec::ARecord {
                    zone: zone_logical_id.clone(),
                    record_name: subdomain.clone(),
                    values: vec![constants::PLACEHOLDER_A_RECORD.to_string()],
                    ttl_seconds: constants::A_RECORD_TTL_SECONDS,
                },
            )
            .after(zone_logical_id.as_str()),
        );

        let launcher = Resource::new(
            format!("{}LauncherLambda", prefix),
            ResourceSpec::Function {
                code: String::from("lambda"),
                handler: String::from("lambda_function.lambda_handler"),
                runtime: String::from("python3.12"),
                environment: BTreeMap::from([
                    (String::from("REGION"), global.server_region.clone()),
                    (String::from("CLUSTER"), container.cluster_name.clone()),
                    (String::from("SERVICE"), container.service_name.clone()),
                ]),
                log_retention_days: constants::LOG_RETENTION_DAYS,
            },
        );
        let launcher_arn = launcher.reference("Arn");
        let launcher_role_arn = launcher.reference("RoleArn");
        node.add(launcher);

        let permission = node.add(Resource::new(
            format!("{}CWPermission", prefix),
            ResourceSpec::FunctionPermission {
                function: launcher_arn.clone(),
                principal: format!("logs.{}.amazonaws.com", constants::DOMAIN_STACK_REGION),
                action: String::from("lambda:InvokeFunction"),
                source_account: scope.account.clone(),
                source_arn: log_group_arn,
            },
        ));
        node.add(
            Resource::new(
                format!("{}SubscriptionFilter", prefix),
                ResourceSpec::SubscriptionFilter {
                    log_group: log_group_id,
                    destination: launcher_arn,
                    filter_pattern: format!("\"{}\"", subdomain),
                },
            )
            .after(permission),
        );

        let hosted_zone_parameter = broker::hosted_zone_parameter(prefix);
        node.add(Resource::new(
            format!("{}HostedZoneParam", prefix),
            ResourceSpec::Parameter {
                parameter_name: hosted_zone_parameter.clone(),
                value: zone_id.clone(),
                description: String::from("Hosted zone ID for minecraft server"),
                allowed_pattern: String::from(".*"),
            },
        ));
        broker.publish(
            &hosted_zone_parameter,
            &zone_id,
            constants::DOMAIN_STACK_NAME,
            constants::DOMAIN_STACK_REGION,
        );

        let launcher_role_parameter = broker::launcher_role_parameter(prefix);
        node.add(Resource::new(
            format!("{}LauncherLambdaParam", prefix),
            ResourceSpec::Parameter {
                parameter_name: launcher_role_parameter.clone(),
                value: launcher_role_arn.clone(),
                description: String::from("Minecraft launcher execution role ARN"),
                allowed_pattern: String::from(".*"),
            },
        ));
        broker.publish(
            &launcher_role_parameter,
            &launcher_role_arn,
            constants::DOMAIN_STACK_NAME,
            constants::DOMAIN_STACK_REGION,
        );

        debug!(prefix, subdomain = subdomain.as_str(), "declared launcher binding");
    }

    return Ok(node);
}

fn compute_stack(
    stack: &str,
    container: &ContainerConfig,
    global: &GlobalConfig,
    cluster_owner: Option<&str>,
    broker: &mut CrossRegionParameterBroker,
) -> Result<(StackNode, ComputeBinding), Error> {
    let weights = CapacityWeights::split(container.fargate_spot_percentage)?;
    let rule = container.edition.ingress_rule();
    let scope = Scope::new(&global.server_region, global.account.as_deref());
    let mut node = StackNode::new(stack, StackKind::Compute, &global.server_region);

    let vpc = node.add(Resource::new(
        "Vpc",
        ResourceSpec::Vpc(match &global.vpc_id {
            Some(vpc_id) => VpcSpec::Existing {
                vpc_id: vpc_id.clone(),
            },
            None => VpcSpec::New {
                max_azs: constants::NEW_VPC_MAX_AZS,
                nat_gateways: 0,
            },
        }),
    ));

    let task_role = node.add(Resource::new(
        "TaskRole",
        ResourceSpec::Role {
            assumed_by: String::from("ecs-tasks.amazonaws.com"),
            description: String::from("Minecraft ECS task role"),
            managed_policies: Vec::new(),
        },
    ));

    match cluster_owner {
        Some(owner) => node.add(Resource::new(
            "Cluster",
            ResourceSpec::ClusterReference {
                cluster_name: container.cluster_name.clone(),
                owner_stack: owner.to_string(),
            },
        )),
        None => node.add(
            Resource::new(
                "Cluster",
                ResourceSpec::Cluster {
                    cluster_name: container.cluster_name.clone(),
                    container_insights: true,
                    fargate_capacity_providers: true,
                },
            )
            .after(vpc.as_str()),
        ),
    };

    let security_group = Resource::new(
        "ServiceSecurityGroup",
        ResourceSpec::SecurityGroup {
            description: String::from("Security group for Minecraft on-demand"),
            ingress: vec![IngressPermission {
                peer: String::from("0.0.0.0/0"),
                protocol: rule.protocol,
                port: rule.port,
                description: String::from("Minecraft server listen port for client connections"),
            }],
        },
    )
    .after(vpc.as_str());
    let security_group_id = security_group.reference("GroupId");
    node.add(security_group);

    let file_system = Resource::new(
        "FileSystem",
        ResourceSpec::FileSystem {
            removal_policy: RemovalPolicy::Snapshot,
        },
    )
    .after(vpc.as_str());
    let file_system_id = file_system.reference("Id");
    let file_system_group = file_system.reference("SecurityGroupId");
    let file_system_logical_id = node.add(file_system);

    let access_point = Resource::new(
        "AccessPoint",
        ResourceSpec::AccessPoint {
            file_system: file_system_id.clone(),
            path: constants::ACCESS_POINT_PATH.to_string(),
            posix_uid: constants::POSIX_ID.to_string(),
            posix_gid: constants::POSIX_ID.to_string(),
            permissions: constants::ACCESS_POINT_PERMISSIONS.to_string(),
        },
    )
    .after(file_system_logical_id.as_str());
    let access_point_id = access_point.reference("Id");
    node.add(access_point);

    node.add(Resource::new(
        "FileSystemIngress",
        ResourceSpec::SecurityGroupIngress {
            group: file_system_group.clone(),
            source_group: security_group_id.clone(),
            protocol: Protocol::Tcp,
            port: constants::NFS_PORT,
            description: String::from("Allow the Minecraft server to use the EFS volume"),
        },
    ));

    let topic_arn = match &container.sns_email_address {
        Some(email) => {
            let topic = Resource::new(
                "ServerSnsTopic",
                ResourceSpec::Topic {
                    display_name: String::from("Minecraft Server Notifications"),
                },
            );
            let topic_arn = topic.reference("Arn");
            let topic_id = node.add(topic);
            node.add(Resource::new(
                "EmailSubscription",
                ResourceSpec::Subscription {
                    topic: topic_id,
                    protocol: String::from("email"),
                    endpoint: email.clone(),
                },
            ));
            Some(topic_arn)
        }
        None => None,
    };

    // The broker only hands out values the domain stack has published; the
    // reader resources fetch the deployed value on every deployment.
    let hosted_zone_parameter = broker::hosted_zone_parameter(&container.prefix);
    broker.resolve(&hosted_zone_parameter, constants::DOMAIN_STACK_REGION, stack)?;
    let zone_reader = Resource::new(
        "Route53HostedZoneIdReader",
        ResourceSpec::ParameterRead {
            parameter_name: hosted_zone_parameter,
            region: constants::DOMAIN_STACK_REGION.to_string(),
            refresh: RefreshPolicy::EveryDeployment,
        },
    );
    let hosted_zone_id = zone_reader.reference("Value");
    node.add(zone_reader);

    let launcher_role_parameter = broker::launcher_role_parameter(&container.prefix);
    broker.resolve(&launcher_role_parameter, constants::DOMAIN_STACK_REGION, stack)?;
    let role_reader = Resource::new(
        "LauncherLambdaRoleArnReader",
        ResourceSpec::ParameterRead {
            parameter_name: launcher_role_parameter,
            region: constants::DOMAIN_STACK_REGION.to_string(),
            refresh: RefreshPolicy::EveryDeployment,
        },
    );
    let launcher_role_arn = role_reader.reference("Value");
    let role_reader_id = node.add(role_reader);
    let launcher_role = node.add(
        Resource::new(
            "LauncherLambdaRole",
            ResourceSpec::ImportedRole {
                role_arn: launcher_role_arn,
            },
        )
        .after(role_reader_id),
    );

    let task_definition = Resource::new(
        "TaskDefinition",
        ResourceSpec::TaskDefinition {
            cpu: container.task_cpu,
            memory_mib: container.task_memory,
            task_role: task_role.clone(),
            volumes: vec![EfsVolume {
                name: constants::ECS_VOLUME_NAME.to_string(),
                file_system: file_system_id.clone(),
                access_point: access_point_id.clone(),
                transit_encryption: true,
                iam_authorization: true,
            }],
            containers: vec![
                server_container(container, rule),
                watchdog_container(container, global, &hosted_zone_id, topic_arn.as_deref()),
            ],
        },
    );
    let task_definition_arn = task_definition.reference("Arn");
    node.add(task_definition);

    let service = node.add(Resource::new(
        "FargateService",
        ResourceSpec::Service {
            cluster: container.cluster_name.clone(),
            service_name: container.service_name.clone(),
            task_definition: task_definition_arn,
            desired_count: 0,
            assign_public_ip: true,
            platform_version: String::from("LATEST"),
            security_groups: vec![security_group_id.clone()],
            capacity_provider_strategy: weights.strategy(),
        },
    ));

    let work_instance_role = match container.enable_work_instance {
        true => Some(work_instance(&mut node, container, global, &scope, &vpc, &file_system_group)?),
        false => None,
    };

    let identifiers = ComputeIdentifiers {
        scope,
        cluster_name: container.cluster_name.clone(),
        service_name: container.service_name.clone(),
        hosted_zone_id,
        file_system_id,
        access_point_id,
        topic_arn,
    };

    if container.enable_file_sync {
        file_sync(&mut node, container, global, &identifiers, &[security_group_id], &vpc, &service)?;
    }

    debug!(
        stack,
        edition = ?container.edition,
        spot = weights.spot,
        "declared compute stack"
    );
    let binding = ComputeBinding {
        stack: stack.to_string(),
        prefix: container.prefix.clone(),
        task_role,
        launcher_role,
        work_instance_role,
        identifiers,
    };
    return Ok((node, binding));
}

fn server_container(container: &ContainerConfig, rule: IngressRule) -> ContainerDefinition {
    let mut environment = BTreeMap::from([
        (String::from("EULA"), String::from("TRUE")),
        (String::from("OVERRIDE_SERVER_PROPERTIES"), String::from("TRUE")),
    ]);
    environment.extend(container.image_env.clone());

    ContainerDefinition {
        name: constants::MC_SERVER_CONTAINER_NAME.to_string(),
        image: container.edition.image().to_string(),
        essential: false,
        environment,
        port_mappings: vec![PortMapping {
            container_port: rule.port,
            host_port: rule.port,
            protocol: rule.protocol,
        }],
        mount_points: vec![MountPoint {
            source_volume: constants::ECS_VOLUME_NAME.to_string(),
            container_path: constants::DATA_MOUNT_PATH.to_string(),
            read_only: false,
        }],
        logging: log_driver(container.debug, constants::MC_SERVER_CONTAINER_NAME),
    }
}

fn watchdog_container(
    container: &ContainerConfig,
    global: &GlobalConfig,
    hosted_zone_id: &str,
    topic_arn: Option<&str>,
) -> ContainerDefinition {
    let twilio = &container.twilio;
    let environment = BTreeMap::from([
        (String::from("CLUSTER"), container.cluster_name.clone()),
        (String::from("SERVICE"), container.service_name.clone()),
        (String::from("DNSZONE"), hosted_zone_id.to_string()),
        (String::from("SERVERNAME"), container.server_name(global)),
        (String::from("SNSTOPIC"), topic_arn.unwrap_or_default().to_string()),
        (String::from("TWILIOFROM"), twilio.phone_from.clone()),
        (String::from("TWILIOTO"), twilio.phone_to.clone()),
        (String::from("TWILIOAID"), twilio.account_id.clone()),
        (String::from("TWILIOAUTH"), twilio.auth_code.clone()),
        (String::from("STARTUPMIN"), container.startup_minutes.to_string()),
        (String::from("SHUTDOWNMIN"), container.shutdown_minutes.to_string()),
    ]);

    ContainerDefinition {
        name: constants::WATCHDOG_CONTAINER_NAME.to_string(),
        image: constants::WATCHDOG_IMAGE.to_string(),
        essential: true,
        environment,
        port_mappings: Vec::new(),
        mount_points: Vec::new(),
        logging: log_driver(container.debug, constants::WATCHDOG_CONTAINER_NAME),
    }
}

fn log_driver(debug: bool, stream_prefix: &str) -> Option<LogDriver> {
    if !debug {
        return None;
    }
    Some(LogDriver {
        stream_prefix: stream_prefix.to_string(),
        retention_days: constants::LOG_RETENTION_DAYS,
    })
}

// A new VPC brings its own public subnets, an existing one has to list them.
fn public_subnet(global: &GlobalConfig, vpc: &str) -> Option<String> {
    match &global.vpc_id {
        None => Some(crate::resource::reference(vpc, "PublicSubnet1Id")),
        Some(_) => global.public_subnet_ids.first().cloned(),
    }
}

// Returns the logical id of the instance role.
fn work_instance(
    node: &mut StackNode,
    container: &ContainerConfig,
    global: &GlobalConfig,
    scope: &Scope,
    vpc: &str,
    file_system_group: &str,
) -> Result<String, Error> {
    let subnet = match public_subnet(global, vpc) {
        Some(subnet) => subnet,
        None => {
            return Err(Error::WorkInstancePrecondition {
                prefix: container.prefix.clone(),
                reason: NO_PUBLIC_SUBNET.to_string(),
            })
        }
    };

    let security_group = Resource::new(
        "WorkInstanceSecurityGroup",
        ResourceSpec::SecurityGroup {
            description: String::from("Security group for Minecraft Work Instance"),
            ingress: Vec::new(),
        },
    )
    .after(vpc);
    let security_group_id = security_group.reference("GroupId");
    node.add(security_group);

    let role = node.add(Resource::new(
        "WorkInstanceRole",
        ResourceSpec::Role {
            assumed_by: String::from("ec2.amazonaws.com"),
            description: String::from("Minecraft EC2 Work Server role"),
            managed_policies: vec![policy::managed_policy_arn(
                constants::SSM_MANAGED_INSTANCE_POLICY,
                scope,
            )],
        },
    ));

    node.add(Resource::new(
        "WorkInstance",
        ResourceSpec::Instance {
            instance_type: constants::WORK_INSTANCE_TYPE.to_string(),
            machine_image: constants::WORK_INSTANCE_IMAGE.to_string(),
            subnet,
            security_group: security_group_id.clone(),
            role: role.clone(),
        },
    ));
    node.add(Resource::new(
        "WorkInstanceFileSystemIngress",
        ResourceSpec::SecurityGroupIngress {
            group: file_system_group.to_string(),
            source_group: security_group_id,
            protocol: Protocol::Tcp,
            port: constants::NFS_PORT,
            description: String::from("Allow the work instance to use the EFS volume"),
        },
    ));

    debug!(prefix = container.prefix.as_str(), "declared work instance");
    return Ok(role);
}

/// Mirrors the EFS volume into a versioned S3 bucket through DataSync.
fn file_sync(
    node: &mut StackNode,
    container: &ContainerConfig,
    global: &GlobalConfig,
    ids: &ComputeIdentifiers,
    security_groups: &[String],
    vpc: &str,
    service: &str,
) -> Result<(), Error> {
    let precondition = |reason: &str| Error::FileSyncPrecondition {
        prefix: container.prefix.clone(),
        reason: reason.to_string(),
    };

    let subnet_id = match public_subnet(global, vpc) {
        Some(subnet_id) => subnet_id,
        None => return Err(precondition(NO_PUBLIC_SUBNET)),
    };
    if security_groups.is_empty() {
        return Err(precondition("the service has no security group"));
    }

    let bucket_name = format!("{}-minecraft-files", container.server_name(global));
    let bucket = node.add(Resource::new(
        "FileSyncBucket",
        ResourceSpec::Bucket {
            bucket_name: bucket_name.clone(),
            versioned: true,
            kms_managed_encryption: true,
            block_public_access: true,
        },
    ));

    let role = Resource::new(
        "BucketSyncAccessRole",
        ResourceSpec::Role {
            assumed_by: String::from("datasync.amazonaws.com"),
            description: String::from("Minecraft file sync role"),
            managed_policies: Vec::new(),
        },
    );
    let role_arn = role.reference("Arn");
    let role_id = node.add(role);
    node.add(Resource::new(
        "BucketSyncAccessPolicy",
        ResourceSpec::Policy {
            roles: vec![role_id],
            statements: policy::file_sync(&bucket_name, &ids.scope)?,
        },
    ));

    let s3_location = Resource::new(
        "S3Location",
        ResourceSpec::SyncLocationS3 {
            bucket_arn: arn::format(&ArnComponents::new("s3", &bucket_name), &ids.scope),
            subdirectory: constants::ACCESS_POINT_PATH.to_string(),
            access_role: role_arn,
        },
    )
    .after(bucket);
    let s3_location_arn = s3_location.reference("LocationArn");
    node.add(s3_location);

    let efs_location = Resource::new(
        "EfsLocation",
        ResourceSpec::SyncLocationEfs {
            file_system_arn: policy::file_system_arn(ids),
            subdirectory: constants::ACCESS_POINT_PATH.to_string(),
            subnet_arn: arn::format(&ArnComponents::new("ec2", "subnet").slash(&subnet_id), &ids.scope),
            security_group_arns: security_groups
                .iter()
                .map(|group| arn::format(&ArnComponents::new("ec2", "security-group").slash(group), &ids.scope))
                .collect(),
        },
    )
    .after(service);
    let efs_location_arn = efs_location.reference("LocationArn");
    node.add(efs_location);

    node.add(Resource::new(
        "EfsToS3SyncTask",
        ResourceSpec::SyncTask {
            name: format!("{}minecraft-efs-to-s3", container.prefix),
            source_location: efs_location_arn.clone(),
            destination_location: s3_location_arn.clone(),
            excludes: vec![String::from("*.jar|/world|/logs")],
        },
    ));
    node.add(Resource::new(
        "S3ToEfsSyncTask",
        ResourceSpec::SyncTask {
            name: format!("{}minecraft-s3-to-efs", container.prefix),
            source_location: s3_location_arn,
            destination_location: efs_location_arn,
            excludes: Vec::new(),
        },
    ));

    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::attach_policies;
    use super::build;
    use super::CapacityWeights;
    use super::Error;
    use crate::broker::CrossRegionParameterBroker;
    use crate::config::{ContainerConfig, Edition, GlobalConfig, Protocol, StackConfig, TwilioConfig};
    use crate::graph::StackKind;
    use crate::policy::compose_compute;
    use crate::resource::{CapacityProvider, ResourceSpec};

    fn global(vpc_id: Option<&str>) -> GlobalConfig {
        GlobalConfig {
            domain_name: String::from("example.com"),
            subdomain_part: String::from("minecraft"),
            server_region: String::from("eu-west-1"),
            vpc_id: vpc_id.map(String::from),
            public_subnet_ids: Vec::new(),
            account: None,
            debug: false,
        }
    }

    fn container(prefix: &str, edition: Edition) -> ContainerConfig {
        ContainerConfig {
            prefix: prefix.to_string(),
            service_name: format!("{}minecraft-server", prefix),
            cluster_name: String::from("minecraft"),
            subdomain_part: format!("{}minecraft", prefix),
            edition,
            shutdown_minutes: 20,
            startup_minutes: 10,
            fargate_spot_percentage: 0,
            task_cpu: 1024,
            task_memory: 2048,
            image_env: BTreeMap::from([(String::from("EULA"), String::from("TRUE"))]),
            sns_email_address: None,
            twilio: TwilioConfig::default(),
            enable_file_sync: false,
            enable_work_instance: false,
            debug: false,
        }
    }

    fn config(containers: Vec<ContainerConfig>) -> StackConfig {
        StackConfig {
            global: global(None),
            containers,
        }
    }

    fn service_spec(spec: &ResourceSpec) -> (u32, Vec<(CapacityProvider, u32)>) {
        match spec {
            ResourceSpec::Service {
                desired_count,
                capacity_provider_strategy,
                ..
            } => (
                *desired_count,
                capacity_provider_strategy
                    .iter()
                    .map(|strategy| (strategy.capacity_provider, strategy.weight))
                    .collect(),
            ),
            _ => panic!("Expected a service"),
        }
    }

    #[test]
    fn single_java_server() {
        let mut broker = CrossRegionParameterBroker::new();
        let blueprint = build(&config(vec![container("", Edition::Java)]), &mut broker).unwrap();
        let graph = &blueprint.graph;

        assert_eq!(2, graph.nodes().len());
        assert_eq!(1, graph.edges().len());
        assert_eq!("minecraft-server-stack", graph.edges()[0].from);
        assert_eq!("minecraft-domain-stack", graph.edges()[0].to);

        let compute = graph.node("minecraft-server-stack").unwrap();
        assert_eq!("eu-west-1", compute.region);
        match &compute.resource("ServiceSecurityGroup").unwrap().spec {
            ResourceSpec::SecurityGroup { ingress, .. } => {
                assert_eq!(Protocol::Tcp, ingress[0].protocol);
                assert_eq!(25565, ingress[0].port);
            }
            _ => panic!("Expected a security group"),
        }

        let (desired_count, strategy) = service_spec(&compute.resource("FargateService").unwrap().spec);
        assert_eq!(0, desired_count);
        assert_eq!(
            vec![(CapacityProvider::Fargate, 100), (CapacityProvider::FargateSpot, 0)],
            strategy
        );
    }

    #[test]
    fn one_compute_stack_per_container() {
        let mut broker = CrossRegionParameterBroker::new();
        let mut bedrock = container("bedrock", Edition::Bedrock);
        bedrock.cluster_name = String::from("bedrock");
        let containers = vec![container("a", Edition::Java), container("b", Edition::Java), bedrock];
        let blueprint = build(&config(containers), &mut broker).unwrap();
        let graph = &blueprint.graph;

        assert_eq!(1, graph.nodes_of_kind(StackKind::Domain).count());
        assert_eq!(3, graph.nodes_of_kind(StackKind::Compute).count());
        for compute in graph.nodes_of_kind(StackKind::Compute) {
            assert_eq!(true, graph.depends_on(&compute.name, "minecraft-domain-stack"));
        }
        assert_eq!(3, blueprint.computes.len());
        assert_eq!(6, broker.parameters().count());
    }

    #[test]
    fn shared_cluster_is_declared_once() {
        let mut broker = CrossRegionParameterBroker::new();
        let containers = vec![container("a", Edition::Java), container("b", Edition::Java)];
        let blueprint = build(&config(containers), &mut broker).unwrap();
        let graph = &blueprint.graph;

        match &graph.node("a-minecraft-server-stack").unwrap().resource("Cluster").unwrap().spec {
            ResourceSpec::Cluster { cluster_name, .. } => assert_eq!("minecraft", cluster_name),
            _ => panic!("Expected a cluster"),
        }
        match &graph.node("b-minecraft-server-stack").unwrap().resource("Cluster").unwrap().spec {
            ResourceSpec::ClusterReference { owner_stack, .. } => {
                assert_eq!("a-minecraft-server-stack", owner_stack)
            }
            _ => panic!("Expected a cluster reference"),
        }
        assert_eq!(true, graph.depends_on("b-minecraft-server-stack", "a-minecraft-server-stack"));
        assert_eq!(
            vec![
                "minecraft-domain-stack",
                "a-minecraft-server-stack",
                "b-minecraft-server-stack"
            ],
            graph.deployment_order().unwrap()
        );
    }

    #[test]
    fn bedrock_uses_udp() {
        let mut broker = CrossRegionParameterBroker::new();
        let blueprint = build(&config(vec![container("", Edition::Bedrock)]), &mut broker).unwrap();
        let compute = blueprint.graph.node("minecraft-server-stack").unwrap();

        match &compute.resource("TaskDefinition").unwrap().spec {
            ResourceSpec::TaskDefinition { containers, .. } => {
                let server = &containers[0];
                assert_eq!("itzg/minecraft-bedrock-server", server.image);
                assert_eq!(Protocol::Udp, server.port_mappings[0].protocol);
                assert_eq!(19132, server.port_mappings[0].container_port);
            }
            _ => panic!("Expected a task definition"),
        }
    }

    #[test]
    fn capacity_weights_always_sum_to_100() {
        for percentage in 0..=100 {
            let weights = CapacityWeights::split(percentage).unwrap();
            assert_eq!(100, weights.spot + weights.on_demand);
            assert_eq!(percentage as u32, weights.spot);
        }

        assert_eq!(Err(Error::SpotPercentageOutOfRange(101)), CapacityWeights::split(101));
        assert_eq!(Err(Error::SpotPercentageOutOfRange(-1)), CapacityWeights::split(-1));
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let mut broker = CrossRegionParameterBroker::new();
        let containers = vec![container("a", Edition::Java), container("a", Edition::Bedrock)];

        let result = build(&config(containers), &mut broker);
        assert_eq!(Err(Error::DuplicatePrefix(String::from("a"))), result.map(|_| ()));
    }

    #[test]
    fn watchdog_contract() {
        let mut broker = CrossRegionParameterBroker::new();
        let mut server = container("", Edition::Java);
        server.sns_email_address = Some(String::from("ops@example.com"));
        server.debug = true;
        let blueprint = build(&config(vec![server]), &mut broker).unwrap();
        let compute = blueprint.graph.node("minecraft-server-stack").unwrap();

        let containers = match &compute.resource("TaskDefinition").unwrap().spec {
            ResourceSpec::TaskDefinition { containers, .. } => containers.clone(),
            _ => panic!("Expected a task definition"),
        };
        let server = &containers[0];
        assert_eq!(Some(&String::from("TRUE")), server.environment.get("OVERRIDE_SERVER_PROPERTIES"));
        assert_eq!(false, server.essential);
        assert_eq!(true, server.logging.is_some());

        let watchdog = &containers[1];
        assert_eq!(true, watchdog.essential);
        let keys: Vec<&str> = watchdog.environment.keys().map(String::as_str).collect();
        assert_eq!(
            vec![
                "CLUSTER",
                "DNSZONE",
                "SERVERNAME",
                "SERVICE",
                "SHUTDOWNMIN",
                "SNSTOPIC",
                "STARTUPMIN",
                "TWILIOAID",
                "TWILIOAUTH",
                "TWILIOFROM",
                "TWILIOTO"
            ],
            keys
        );
        assert_eq!("minecraft.example.com", watchdog.environment["SERVERNAME"]);
        assert_eq!("${Route53HostedZoneIdReader.Value}", watchdog.environment["DNSZONE"]);
        assert_eq!("${ServerSnsTopic.Arn}", watchdog.environment["SNSTOPIC"]);
    }

    #[test]
    fn file_sync_requires_public_subnet() {
        let mut broker = CrossRegionParameterBroker::new();
        let mut server = container("", Edition::Java);
        server.enable_file_sync = true;
        let stack_config = StackConfig {
            global: global(Some("vpc-123")),
            containers: vec![server.clone()],
        };

        match build(&stack_config, &mut broker).err().unwrap() {
            Error::FileSyncPrecondition { .. } => {}
            _ => panic!("Expected `FileSyncPrecondition` error"),
        }

        let mut broker = CrossRegionParameterBroker::new();
        let blueprint = build(&config(vec![server]), &mut broker).unwrap();
        let compute = blueprint.graph.node("minecraft-server-stack").unwrap();
        assert_eq!(true, compute.resource("EfsToS3SyncTask").is_some());
        assert_eq!(true, compute.resource("S3ToEfsSyncTask").is_some());
    }

    #[test]
    fn work_instance_has_efs_access() {
        let mut broker = CrossRegionParameterBroker::new();
        let mut server = container("", Edition::Java);
        server.enable_work_instance = true;
        let mut blueprint = build(&config(vec![server.clone()]), &mut broker).unwrap();
        let binding = blueprint.computes[0].clone();
        assert_eq!(Some(String::from("WorkInstanceRole")), binding.work_instance_role);

        let policies = compose_compute(&binding.identifiers).unwrap();
        attach_policies(&mut blueprint.graph, &binding, policies).unwrap();
        let compute = blueprint.graph.node("minecraft-server-stack").unwrap();

        match &compute.resource("WorkInstance").unwrap().spec {
            ResourceSpec::Instance {
                instance_type,
                subnet,
                security_group,
                role,
                ..
            } => {
                assert_eq!("t2.micro", instance_type);
                assert_eq!("${Vpc.PublicSubnet1Id}", subnet);
                assert_eq!("${WorkInstanceSecurityGroup.GroupId}", security_group);
                assert_eq!("WorkInstanceRole", role);
            }
            _ => panic!("Expected an instance"),
        }
        match &compute.resource("WorkInstanceRole").unwrap().spec {
            ResourceSpec::Role {
                assumed_by,
                managed_policies,
                ..
            } => {
                assert_eq!("ec2.amazonaws.com", assumed_by);
                assert_eq!(
                    vec![String::from("arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore")],
                    *managed_policies
                );
            }
            _ => panic!("Expected a role"),
        }
        match &compute.resource("WorkInstanceFileSystemIngress").unwrap().spec {
            ResourceSpec::SecurityGroupIngress {
                group,
                source_group,
                port,
                ..
            } => {
                assert_eq!("${FileSystem.SecurityGroupId}", group);
                assert_eq!("${WorkInstanceSecurityGroup.GroupId}", source_group);
                assert_eq!(2049, *port);
            }
            _ => panic!("Expected a security group ingress"),
        }
        match &compute.resource("DataReadWritePolicy").unwrap().spec {
            ResourceSpec::Policy { roles, statements } => {
                assert_eq!(vec!["TaskRole", "WorkInstanceRole"], *roles);
                assert_eq!(Some(String::from("AllowReadWriteOnEFS")), statements[0].sid);
            }
            _ => panic!("Expected a policy"),
        }

        let stack_config = StackConfig {
            global: global(Some("vpc-123")),
            containers: vec![server],
        };
        let mut broker = CrossRegionParameterBroker::new();
        match build(&stack_config, &mut broker).err().unwrap() {
            Error::WorkInstancePrecondition { .. } => {}
            _ => panic!("Expected `WorkInstancePrecondition` error"),
        }
    }

    #[test]
    fn work_instance_is_opt_in() {
        let mut broker = CrossRegionParameterBroker::new();
        let blueprint = build(&config(vec![container("", Edition::Java)]), &mut broker).unwrap();
        let compute = blueprint.graph.node("minecraft-server-stack").unwrap();

        assert_eq!(None, blueprint.computes[0].work_instance_role);
        assert_eq!(true, compute.resource("WorkInstance").is_none());
        assert_eq!(true, compute.resource("WorkInstanceRole").is_none());
    }
}
