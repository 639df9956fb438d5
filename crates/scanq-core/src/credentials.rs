/// API credentials for the scan service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    /// Premium keys are admitted against the higher per-minute limit.
    pub premium: bool,
}

/// Source of credentials, consulted before every remote call so that keys
/// provisioned after startup are picked up without a restart.
pub trait CredentialStore: Send {
    fn get(&self) -> Option<Credentials>;
}

/// Credentials fixed at startup from config and environment.
pub struct StaticCredentials {
    creds: Option<Credentials>,
}

impl StaticCredentials {
    /// `SCANQ_API_KEY` overrides the configured key; an empty key counts
    /// as missing.
    pub fn from_config(api_key: &str, premium: bool) -> Self {
        let key = match std::env::var("SCANQ_API_KEY") {
            Ok(v) if !v.is_empty() => v,
            _ => api_key.to_owned(),
        };
        let creds = if key.is_empty() {
            None
        } else {
            Some(Credentials {
                api_key: key,
                premium,
            })
        };
        StaticCredentials { creds }
    }
}

impl CredentialStore for StaticCredentials {
    fn get(&self) -> Option<Credentials> {
        self.creds.clone()
    }
}
