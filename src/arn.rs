use serde::{Deserialize, Serialize};

/// Deploy-time account token used when no account id is configured.
pub const ACCOUNT_TOKEN: &str = "${AWS::AccountId}";

const PARTITION: &str = "aws";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArnFormat {
    /// `resource/name`, e.g. `task/minecraft/*`
    SlashResourceName,
    /// `resource:name`, e.g. `log-group:/aws/route53/*`
    ColonResourceName,
    /// just `resource`, e.g. an S3 bucket name
    NoResourceName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub partition: String,
    pub region: String,
    pub account: String,
}

impl Scope {
    pub fn new(region: &str, account: Option<&str>) -> Self {
        Self {
            partition: PARTITION.to_string(),
            region: region.to_string(),
            account: account.unwrap_or(ACCOUNT_TOKEN).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArnComponents<'a> {
    pub service: &'a str,
    pub resource: &'a str,
    pub resource_name: Option<&'a str>,
    pub format: ArnFormat,
}

impl<'a> ArnComponents<'a> {
    pub fn new(service: &'a str, resource: &'a str) -> Self {
        Self {
            service,
            resource,
            resource_name: None,
            format: ArnFormat::NoResourceName,
        }
    }

    pub fn slash(mut self, resource_name: &'a str) -> Self {
        self.resource_name = Some(resource_name);
        self.format = ArnFormat::SlashResourceName;
        self
    }

    pub fn colon(mut self, resource_name: &'a str) -> Self {
        self.resource_name = Some(resource_name);
        self.format = ArnFormat::ColonResourceName;
        self
    }
}

// Global services leave region (and for some, account) empty.
fn qualifiers<'s>(service: &str, scope: &'s Scope) -> (&'s str, &'s str) {
    match service {
        "route53" | "s3" => ("", ""),
        "iam" => ("", scope.account.as_str()),
        _ => (scope.region.as_str(), scope.account.as_str()),
    }
}

pub fn format(components: &ArnComponents, scope: &Scope) -> String {
    let (region, account) = qualifiers(components.service, scope);
    let resource = match (components.format, components.resource_name) {
        (ArnFormat::SlashResourceName, Some(name)) => format!("{}/{}", components.resource, name),
        (ArnFormat::ColonResourceName, Some(name)) => format!("{}:{}", components.resource, name),
        _ => components.resource.to_string(),
    };

    format!(
        "arn:{}:{}:{}:{}:{}",
        scope.partition, components.service, region, account, resource
    )
}

#[cfg(test)]
mod tests {
    use super::format;
    use super::ArnComponents;
    use super::Scope;

    #[test]
    fn regional_slash_resource() {
        let scope = Scope::new("eu-west-1", Some("123456789012"));
        let arn = format(&ArnComponents::new("ecs", "task").slash("minecraft/*"), &scope);
        assert_eq!("arn:aws:ecs:eu-west-1:123456789012:task/minecraft/*", arn);
    }

    #[test]
    fn colon_resource_and_account_token() {
        let scope = Scope::new("us-east-1", None);
        let arn = format(&ArnComponents::new("logs", "log-group").colon("*"), &scope);
        assert_eq!("arn:aws:logs:us-east-1:${AWS::AccountId}:log-group:*", arn);
    }

    #[test]
    fn global_services_drop_region_and_account() {
        let scope = Scope::new("eu-west-1", Some("123456789012"));

        let zone = format(&ArnComponents::new("route53", "hostedzone").slash("Z123"), &scope);
        assert_eq!("arn:aws:route53:::hostedzone/Z123", zone);

        let bucket = format(&ArnComponents::new("s3", "example.com-minecraft-files"), &scope);
        assert_eq!("arn:aws:s3:::example.com-minecraft-files", bucket);

        let role = format(&ArnComponents::new("iam", "role").slash("launcher"), &scope);
        assert_eq!("arn:aws:iam::123456789012:role/launcher", role);
    }
}
