pub const DOMAIN_STACK_NAME: &str = "minecraft-domain-stack";
pub const COMPUTE_STACK_SUFFIX: &str = "minecraft-server-stack";

// Route53 query logging only delivers to CloudWatch Logs in us-east-1, so the
// launcher has to live there as well.
pub const DOMAIN_STACK_REGION: &str = "us-east-1";

pub const DEFAULT_SERVER_REGION: &str = "us-east-1";
pub const DEFAULT_SUBDOMAIN_PART: &str = "minecraft";
pub const DEFAULT_CLUSTER_NAME: &str = "minecraft";
pub const DEFAULT_SERVICE_NAME: &str = "minecraft-server";
pub const DEFAULT_SHUTDOWN_MINUTES: u32 = 20;
pub const DEFAULT_STARTUP_MINUTES: u32 = 10;
pub const DEFAULT_TASK_CPU: u32 = 1024;
pub const DEFAULT_TASK_MEMORY: u32 = 2048;

pub const MC_SERVER_CONTAINER_NAME: &str = "minecraft-server";
pub const WATCHDOG_CONTAINER_NAME: &str = "minecraft-ecsfargate-watchdog";
pub const WATCHDOG_IMAGE: &str = "doctorray/minecraft-ecsfargate-watchdog";
pub const JAVA_EDITION_IMAGE: &str = "itzg/minecraft-server";
pub const BEDROCK_EDITION_IMAGE: &str = "itzg/minecraft-bedrock-server";

pub const ECS_VOLUME_NAME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/data";
pub const ACCESS_POINT_PATH: &str = "/minecraft";
pub const POSIX_ID: &str = "1000";
pub const ACCESS_POINT_PERMISSIONS: &str = "0755";

pub const HOSTED_ZONE_PARAMETER: &str = "MinecraftHostedZoneID";
pub const LAUNCHER_ROLE_PARAMETER: &str = "LauncherLambdaRoleArn";

pub const LOG_RETENTION_DAYS: u32 = 3;
pub const PLACEHOLDER_A_RECORD: &str = "192.168.1.1";
pub const A_RECORD_TTL_SECONDS: u32 = 30;
pub const DNS_LOGGING_POLICY_NAME: &str = "cw.r.route53-dns";

pub const NEW_VPC_MAX_AZS: u32 = 3;
pub const NFS_PORT: u16 = 2049;

pub const WORK_INSTANCE_TYPE: &str = "t2.micro";
pub const WORK_INSTANCE_IMAGE: &str = "al2023-ami-2023.*-kernel-6.1-x86_64";
pub const SSM_MANAGED_INSTANCE_POLICY: &str = "AmazonSSMManagedInstanceCore";
