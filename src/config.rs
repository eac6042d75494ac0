use anyhow::Context;
use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr};

const DEFAULT_BUCKET: &str = "bucket-presign-test-us-west-2";
const DEFAULT_RESOURCE_DIR: &str = "resources";
const DEFAULT_PRESIGN_EXPIRY_SECONDS: u64 = 60;
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Connection parameters of an S3 compatible server. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    endpoint: String,
    access_key: String,
    secret_key: String,
    region: Option<String>,
    secure: bool,
}

impl ConnectionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        secure: bool,
        region: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region,
            secure,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = required_var("OBJECT_STORAGE_ENDPOINT")?;
        let access_key = required_var("OBJECT_STORAGE_ACCESS_KEY")?;
        let secret_key = required_var("OBJECT_STORAGE_SECRET_KEY")?;
        let secure = match env::var("OBJECT_STORAGE_SECURE") {
            Ok(value) => value
                .parse::<bool>()
                .with_context(|| format!("invalid [OBJECT_STORAGE_SECURE] value: {}", value))?,
            Err(_) => false,
        };
        let region = env::var("OBJECT_STORAGE_REGION").ok();

        Ok(Self::new(endpoint, access_key, secret_key, secure, region))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Region, only when it is not blank.
    pub fn region(&self) -> Option<&str> {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
    }

    pub fn use_region(&self) -> bool {
        self.region().is_some()
    }

    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Which client the sample server talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    S3,
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            _ => Err(anyhow::anyhow!("Invalid backend : {}", s)),
        }
    }
}

/// Settings of the sample download endpoints.
#[derive(Debug, Clone)]
pub struct SampleSettings {
    pub bucket: String,
    pub resource_dir: PathBuf,
    pub presign_expiry_secs: u64,
    pub addr: SocketAddr,
    pub backend: Backend,
    pub trace: bool,
}

impl SampleSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let bucket = env::var("OBJECT_STORAGE_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        let resource_dir = env::var("SAMPLE_RESOURCE_DIR")
            .unwrap_or_else(|_| DEFAULT_RESOURCE_DIR.to_string())
            .into();
        let presign_expiry_secs = match env::var("PRESIGN_EXPIRY_SECONDS") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid [PRESIGN_EXPIRY_SECONDS] value: {}", value))?,
            Err(_) => DEFAULT_PRESIGN_EXPIRY_SECONDS,
        };
        let addr = env::var("SAMPLE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid [SAMPLE_ADDR] value: {}", addr))?;
        let backend = match env::var("OBJECT_STORAGE_BACKEND") {
            Ok(value) => value.parse::<Backend>()?,
            Err(_) => Backend::S3,
        };
        let trace = match env::var("OBJECT_STORAGE_TRACE") {
            Ok(value) => value
                .parse::<bool>()
                .with_context(|| format!("invalid [OBJECT_STORAGE_TRACE] value: {}", value))?,
            Err(_) => false,
        };

        Ok(Self {
            bucket,
            resource_dir,
            presign_expiry_secs,
            addr,
            backend,
            trace,
        })
    }
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            resource_dir: DEFAULT_RESOURCE_DIR.into(),
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECONDS,
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            backend: Backend::S3,
            trace: false,
        }
    }
}

fn required_var(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("undefined [{}]", key))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_use_region_only_when_not_blank() {
        let with_region = ConnectionConfig::new(
            "s3.amazonaws.com",
            "access",
            "secret",
            false,
            Some("us-west-2".to_string()),
        );
        assert!(with_region.use_region());
        assert_eq!(Some("us-west-2"), with_region.region());

        let blank = ConnectionConfig::new("s3.amazonaws.com", "access", "secret", false, Some("  ".to_string()));
        assert!(!blank.use_region());
        assert_eq!(None, blank.region());

        let none = ConnectionConfig::new("s3.amazonaws.com", "access", "secret", false, None);
        assert!(!none.use_region());
    }

    #[test]
    fn should_build_endpoint_url_from_secure_flag() {
        let plain = ConnectionConfig::new("localhost:9000", "access", "secret", false, None);
        assert_eq!("http://localhost:9000", plain.endpoint_url());

        let secure = ConnectionConfig::new("s3.amazonaws.com", "access", "secret", true, None);
        assert_eq!("https://s3.amazonaws.com", secure.endpoint_url());
    }

    #[test]
    fn should_parse_backend() {
        assert_eq!(Backend::S3, "s3".parse::<Backend>().unwrap());
        assert_eq!(Backend::Memory, "Memory".parse::<Backend>().unwrap());
        assert!("gcs".parse::<Backend>().is_err());
    }

    #[test]
    fn should_not_print_secret_key() {
        let config = ConnectionConfig::new("localhost:9000", "access", "very-secret", false, None);
        let printed = format!("{:?}", config);
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains("access"));
    }
}
