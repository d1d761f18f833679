use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::{fs, io, path::Path, path::PathBuf};
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

use crate::constants;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Missing required `DOMAIN_NAME`, set it to the domain of an existing Route53 hosted zone")]
    MissingDomainName,

    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Prefix `{0}` is used by more than one container config")]
    DuplicatePrefix(String),

    #[error("Server name `{0}` is used by more than one container config")]
    DuplicateServerName(String),

    #[error("Service `{service}` in cluster `{cluster}` is used by more than one container config")]
    DuplicateService { cluster: String, service: String },

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// Flat key/value view of one configuration source.
pub type Source = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GlobalConfig {
    #[validate(custom = "validate_domain_name")]
    pub domain_name: String,

    #[validate(length(min = 1))]
    pub subdomain_part: String,

    #[validate(length(min = 1))]
    pub server_region: String,

    pub vpc_id: Option<String>,

    pub public_subnet_ids: Vec<String>,

    pub account: Option<String>,

    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Java,
    Bedrock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub port: u16,
}

impl Edition {
    fn parse(value: Option<&str>) -> Self {
        match value {
            None => Edition::Java,
            Some(raw) if raw.eq_ignore_ascii_case("bedrock") => Edition::Bedrock,
            Some(raw) if raw.eq_ignore_ascii_case("java") => Edition::Java,
            Some(raw) => {
                warn!(edition = raw, "unknown minecraft edition, using java");
                Edition::Java
            }
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Edition::Java => constants::JAVA_EDITION_IMAGE,
            Edition::Bedrock => constants::BEDROCK_EDITION_IMAGE,
        }
    }

    pub fn ingress_rule(&self) -> IngressRule {
        match self {
            Edition::Java => IngressRule {
                protocol: Protocol::Tcp,
                port: 25565,
            },
            Edition::Bedrock => IngressRule {
                protocol: Protocol::Udp,
                port: 19132,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub phone_from: String,
    pub phone_to: String,
    pub account_id: String,
    pub auth_code: String,
}

impl TwilioConfig {
    fn fields(&self) -> [&str; 4] {
        [
            &self.phone_from,
            &self.phone_to,
            &self.account_id,
            &self.auth_code,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|field| field.is_empty())
    }

    pub fn is_complete(&self) -> bool {
        self.fields().iter().all(|field| !field.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_task_size"))]
pub struct ContainerConfig {
    #[validate(custom = "validate_prefix")]
    pub prefix: String,

    #[validate(length(min = 1))]
    pub service_name: String,

    #[validate(length(min = 1))]
    pub cluster_name: String,

    #[validate(length(min = 1))]
    pub subdomain_part: String,

    pub edition: Edition,

    #[validate(range(min = 1))]
    pub shutdown_minutes: u32,

    #[validate(range(min = 1))]
    pub startup_minutes: u32,

    #[validate(range(min = 0, max = 100))]
    pub fargate_spot_percentage: i64,

    pub task_cpu: u32,

    pub task_memory: u32,

    pub image_env: BTreeMap<String, String>,

    #[validate(email)]
    pub sns_email_address: Option<String>,

    pub twilio: TwilioConfig,

    pub enable_file_sync: bool,

    pub enable_work_instance: bool,

    pub debug: bool,
}

impl ContainerConfig {
    /// Fully qualified name players connect to, e.g. `minecraft.example.com`.
    pub fn server_name(&self, global: &GlobalConfig) -> String {
        format!("{}.{}", self.subdomain_part, global.domain_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub global: GlobalConfig,
    pub containers: Vec<ContainerConfig>,
}

/// Resolves the global config from `env` and one container config per
/// definition file found in `container_dir`. When no definition file exists,
/// a single container config is read from `env` itself.
pub fn resolve(env: &HashMap<String, String>, container_dir: Option<&Path>) -> Result<StackConfig, Error> {
    let env: Source = env
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let global = resolve_global(&env)?;

    let mut sources = match container_dir {
        Some(dir) if dir.is_dir() => read_container_sources(dir)?,
        Some(dir) => {
            debug!(path = ?dir, "container definition directory does not exist");
            Vec::new()
        }
        None => Vec::new(),
    };
    if sources.is_empty() {
        info!("no container definition files found, reading container config from environment");
        sources.push((String::from("environment"), env.clone()));
    }

    let mut containers = Vec::with_capacity(sources.len());
    let mut prefixes = HashSet::new();
    let mut server_names = HashSet::new();
    let mut services = HashSet::new();
    for (origin, source) in &sources {
        let container = resolve_container(source, &global)?;
        match container.validate() {
            Ok(_) => (),
            Err(error) => return Err(Error::ValidationError(format!("{}: {}", origin, error))),
        }
        // Prefixes, server names and services end up in resource names that
        // must not collide across servers.
        if !prefixes.insert(container.prefix.clone()) {
            return Err(Error::DuplicatePrefix(container.prefix));
        }
        let server_name = container.server_name(&global);
        if !server_names.insert(server_name.clone()) {
            return Err(Error::DuplicateServerName(server_name));
        }
        if !services.insert((container.cluster_name.clone(), container.service_name.clone())) {
            return Err(Error::DuplicateService {
                cluster: container.cluster_name,
                service: container.service_name,
            });
        }
        debug!(
            origin = origin.as_str(),
            prefix = container.prefix.as_str(),
            edition = ?container.edition,
            "resolved container config"
        );
        containers.push(container);
    }

    return Ok(StackConfig { global, containers });
}

fn resolve_global(env: &Source) -> Result<GlobalConfig, Error> {
    let domain_name = match lookup(env, "DOMAIN_NAME") {
        Some(domain_name) => domain_name.to_ascii_lowercase(),
        None => return Err(Error::MissingDomainName),
    };

    let public_subnet_ids = lookup(env, "PUBLIC_SUBNET_IDS")
        .map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let global = GlobalConfig {
        domain_name,
        subdomain_part: lookup(env, "SUBDOMAIN_PART")
            .unwrap_or(constants::DEFAULT_SUBDOMAIN_PART)
            .to_ascii_lowercase(),
        server_region: lookup(env, "SERVER_REGION")
            .unwrap_or(constants::DEFAULT_SERVER_REGION)
            .to_string(),
        vpc_id: lookup(env, "VPC_ID").map(String::from),
        public_subnet_ids,
        account: lookup(env, "CDK_DEFAULT_ACCOUNT").map(String::from),
        debug: as_boolean(lookup(env, "DEBUG")),
    };

    match global.validate() {
        Ok(_) => Ok(global),
        Err(error) => Err(Error::ValidationError(error.to_string())),
    }
}

fn resolve_container(source: &Source, global: &GlobalConfig) -> Result<ContainerConfig, Error> {
    let fargate_spot_percentage = match lookup(source, "FARGATE_SPOT_PERCENTAGE") {
        Some(raw) => parse_number::<i64>("FARGATE_SPOT_PERCENTAGE", raw)?,
        None if as_boolean(lookup(source, "USE_FARGATE_SPOT")) => 100,
        None => 0,
    };

    let twilio = TwilioConfig {
        phone_from: lookup(source, "TWILIO_PHONE_FROM").unwrap_or_default().to_string(),
        phone_to: lookup(source, "TWILIO_PHONE_TO").unwrap_or_default().to_string(),
        account_id: lookup(source, "TWILIO_ACCOUNT_ID").unwrap_or_default().to_string(),
        auth_code: lookup(source, "TWILIO_AUTH_CODE").unwrap_or_default().to_string(),
    };
    if !twilio.is_empty() && !twilio.is_complete() {
        // Passed through as-is, the watchdog simply won't be able to text.
        warn!("twilio credentials are incomplete, text notifications will not work");
    }

    let debug = match lookup(source, "DEBUG") {
        Some(raw) => as_boolean(Some(raw)),
        None => global.debug,
    };

    return Ok(ContainerConfig {
        prefix: lookup(source, "PREFIX").unwrap_or_default().to_string(),
        service_name: lookup(source, "SERVICE_NAME")
            .unwrap_or(constants::DEFAULT_SERVICE_NAME)
            .to_string(),
        cluster_name: lookup(source, "CLUSTER_NAME")
            .unwrap_or(constants::DEFAULT_CLUSTER_NAME)
            .to_string(),
        subdomain_part: lookup(source, "SUBDOMAIN_PART")
            .unwrap_or(global.subdomain_part.as_str())
            .to_ascii_lowercase(),
        edition: Edition::parse(lookup(source, "MINECRAFT_EDITION")),
        shutdown_minutes: number_or(source, "SHUTDOWN_MINUTES", constants::DEFAULT_SHUTDOWN_MINUTES)?,
        startup_minutes: number_or(source, "STARTUP_MINUTES", constants::DEFAULT_STARTUP_MINUTES)?,
        fargate_spot_percentage,
        task_cpu: number_or(source, "TASK_CPU", constants::DEFAULT_TASK_CPU)?,
        task_memory: number_or(source, "TASK_MEMORY", constants::DEFAULT_TASK_MEMORY)?,
        image_env: resolve_image_env(lookup(source, "MINECRAFT_IMAGE_ENV_VARS_JSON")),
        sns_email_address: lookup(source, "SNS_EMAIL_ADDRESS").map(String::from),
        twilio,
        enable_file_sync: as_boolean(lookup(source, "ENABLE_FILE_SYNC")),
        enable_work_instance: as_boolean(lookup(source, "ENABLE_WORK_INSTANCE")),
        debug,
    });
}

/// `EULA=TRUE` merged with the JSON overrides. A blob that does not parse is
/// reported and ignored.
fn resolve_image_env(json: Option<&str>) -> BTreeMap<String, String> {
    let mut image_env = BTreeMap::from([(String::from("EULA"), String::from("TRUE"))]);
    let json = match json {
        Some(json) => json,
        None => return image_env,
    };

    let overrides: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(json) {
        Ok(overrides) => overrides,
        Err(error) => {
            warn!(
                %error,
                "unable to parse MINECRAFT_IMAGE_ENV_VARS_JSON, defaults will be used"
            );
            return image_env;
        }
    };

    for (key, value) in overrides {
        match value {
            serde_json::Value::String(value) => {
                image_env.insert(key, value);
            }
            serde_json::Value::Number(value) => {
                image_env.insert(key, value.to_string());
            }
            serde_json::Value::Bool(value) => {
                image_env.insert(key, value.to_string().to_uppercase());
            }
            _ => warn!(key = key.as_str(), "ignoring non-scalar image environment value"),
        }
    }

    image_env
}

fn read_container_sources(dir: &Path) -> Result<Vec<(String, Source)>, Error> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut paths: Vec<PathBuf> = Vec::new();
    for extension in ["yaml", "yml"] {
        let pattern = format!("{}/*.{}", escaped, extension);
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(error) => return Err(Error::Unknown(error.to_string())),
        };
        for entry in entries {
            match entry {
                Ok(path) => paths.push(path),
                Err(error) => return Err(Error::Unknown(error.to_string())),
            }
        }
    }
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let source = read_container_source(&path)?;
        sources.push((path.display().to_string(), source));
    }

    return Ok(sources);
}

fn read_container_source(path: &Path) -> Result<Source, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let raw: BTreeMap<String, serde_yaml::Value> = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(format!("{}: {}", path.display(), error))),
    }?;

    let mut source = Source::new();
    for (key, value) in raw {
        let value = match value {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(value) => value.to_string(),
            serde_yaml::Value::Number(value) => value.to_string(),
            serde_yaml::Value::String(value) => value,
            _ => {
                return Err(Error::ParsingError(format!(
                    "{}: `{}` must be a scalar value",
                    path.display(),
                    key
                )))
            }
        };
        source.insert(key, value);
    }

    return Ok(source);
}

/// Empty values count as absent.
fn lookup<'a>(source: &'a Source, key: &str) -> Option<&'a str> {
    source
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn as_boolean(value: Option<&str>) -> bool {
    matches!(value, Some(value) if value.eq_ignore_ascii_case("true"))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    match raw.parse::<T>() {
        Ok(number) => Ok(number),
        Err(error) => Err(Error::ParsingError(format!("`{}` ({}): {}", key, raw, error))),
    }
}

fn number_or(source: &Source, key: &str, default: u32) -> Result<u32, Error> {
    match lookup(source, key) {
        Some(raw) => parse_number(key, raw),
        None => Ok(default),
    }
}

fn validate_domain_name(domain_name: &str) -> Result<(), ValidationError> {
    let well_formed = domain_name.contains('.')
        && !domain_name.starts_with('.')
        && !domain_name.ends_with('.')
        && !domain_name.contains("..")
        && domain_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !well_formed {
        return Err(ValidationError::new(
            "The domain name has to be a fully qualified domain, e.g. `example.com`",
        ));
    }

    return Ok(());
}

// Prefixes end up in parameter names and logical ids.
fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            "PREFIX may only contain ASCII letters and digits",
        ));
    }

    return Ok(());
}

fn validate_task_size(config: &ContainerConfig) -> Result<(), ValidationError> {
    let memory = config.task_memory;
    let valid = match config.task_cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    };
    if !valid {
        return Err(ValidationError::new(
            "TASK_CPU and TASK_MEMORY have to be a supported Fargate combination",
        ));
    }

    return Ok(());
}
