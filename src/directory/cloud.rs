use serde::Deserialize;

/// National cloud the directory tenant lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudEnvironment {
    #[default]
    Global,
    UsGovernment,
    China,
}

impl CloudEnvironment {
    /// Base URL of the OAuth2 authority.
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Global => "https://login.microsoftonline.com",
            CloudEnvironment::UsGovernment => "https://login.microsoftonline.us",
            CloudEnvironment::China => "https://login.chinacloudapi.cn",
        }
    }

    /// Base URL of Microsoft Graph, without API version.
    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Global => "https://graph.microsoft.com",
            CloudEnvironment::UsGovernment => "https://graph.microsoft.us",
            CloudEnvironment::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "global" | "public" => Some(CloudEnvironment::Global),
            "us_government" | "usgov" => Some(CloudEnvironment::UsGovernment),
            "china" => Some(CloudEnvironment::China),
            _ => None,
        }
    }
}
