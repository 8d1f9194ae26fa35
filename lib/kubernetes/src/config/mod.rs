mod file;
mod incluster;
mod tls;

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;
use tracing::debug;

/// Errors from loading data from a base64 string or a file
#[derive(Debug, thiserror::Error)]
pub enum LoadDataError {
    /// Failed to decode base64 data
    #[error("failed to decode base64 data: {0}")]
    DecodeBase64(#[source] base64::DecodeError),

    /// Failed to read file
    #[error("failed to read file '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    /// No base64 data or file path was provided
    #[error("missing base64 data or file")]
    MissingDataOrFile,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InCluster(#[from] incluster::Error),

    #[error(transparent)]
    File(#[from] file::Error),

    #[error(transparent)]
    Tls(#[from] tls::Error),

    #[error("invalid master url: {0}")]
    InvalidMaster(#[source] http::uri::InvalidUri),

    #[error("no kubeconfig found, neither KUBECONFIG nor HOME is set")]
    NoKubeConfig,
}

struct Inner {
    token: String,
    expire_at: Instant,
}

/// A bearer token read from a file, it is re-read once a minute, so
/// rotated service account tokens are picked up.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .finish()
    }
}

impl RefreshableToken {
    pub(crate) fn new(path: PathBuf) -> std::io::Result<Self> {
        let token = std::fs::read_to_string(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new(Inner {
                token: token.trim().to_string(),
                expire_at: Instant::now() + Duration::from_secs(60),
            })),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if now > inner.expire_at {
            let content = std::fs::read_to_string(&self.path)?;
            inner.token = content.trim().to_string();
            inner.expire_at = now + Duration::from_secs(60);
        }

        Ok(inner.token.clone())
    }
}

#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req.headers_mut()
                    .typed_insert(Authorization::basic(username, password));
            }
            Auth::Bearer { token } => {
                let auth = Authorization::bearer(token).map_err(std::io::Error::other)?;
                req.headers_mut().typed_insert(auth);
            }
            Auth::RefreshableToken(refreshable_token) => {
                let token = refreshable_token.token()?;
                let auth = Authorization::bearer(&token).map_err(std::io::Error::other)?;
                req.headers_mut().typed_insert(auth);
            }
        }

        Ok(())
    }
}

/// Configuration object detailing things like cluster URL, default namespace,
/// root certificates, and timeouts.
///
/// Construct it with [`Config::load`], which resolves the configuration the
/// same way `kubectl` and client-go do, it exists to be consumed by the
/// [`Client`](crate::Client).
#[derive(Debug)]
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// The configured default namespace.
    pub default_namespace: String,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    /// Optional proxy URL.
    pub proxy_url: Option<http::Uri>,

    pub tls: rustls::ClientConfig,
}

impl Config {
    /// Build the config from the optional master url and kubeconfig path.
    ///
    /// - kubeconfig given: load it, `master` overrides its server address.
    /// - neither given: in-cluster config, then the default kubeconfig.
    /// - only master given: the default kubeconfig if one exists, otherwise
    ///   an unauthenticated config pointing at master.
    pub fn load(master: Option<&str>, kubeconfig: Option<&Path>) -> Result<Config, Error> {
        let mut config = match (master, kubeconfig) {
            (_, Some(path)) => file::from_config(path)?,
            (None, None) => match incluster::incluster_env() {
                Ok(config) => config,
                Err(err) => {
                    debug!(
                        message = "in-cluster config not available, try default kubeconfig",
                        %err
                    );

                    file::from_config(default_kubeconfig_path()?)?
                }
            },
            (Some(_), None) => match default_kubeconfig_path() {
                Ok(path) if path.exists() => file::from_config(path)?,
                _ => Config::bare()?,
            },
        };

        if let Some(master) = master {
            config.cluster_url = master.parse().map_err(Error::InvalidMaster)?;
        }

        Ok(config)
    }

    /// A config without any credential, the cluster url must be set by the caller.
    fn bare() -> Result<Config, Error> {
        let root_store = tls::native_roots()?;
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Config {
            cluster_url: http::Uri::from_static("https://localhost"),
            default_namespace: String::from("default"),
            auth: Auth::None,
            proxy_url: None,
            tls,
        })
    }
}

/// The first path of `KUBECONFIG`, or `$HOME/.kube/config`
fn default_kubeconfig_path() -> Result<PathBuf, Error> {
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(path) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Ok(path);
        }
    }

    match std::env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home).join(".kube").join("config")),
        None => Err(Error::NoKubeConfig),
    }
}
