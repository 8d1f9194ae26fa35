use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde::Deserialize;

use super::tls::{client_auth, native_roots, root_store_from_pem};
use super::{Auth, Config, LoadDataError, RefreshableToken};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read kube config
    #[error("failed to read '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),
    /// Failed to parse kube config YAML
    #[error("failed to parse kube config YAML: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// Failed to determine current context
    #[error("failed to determine current context")]
    CurrentContextNotSet,
    /// Failed to load current context
    #[error("failed to load current context: {0}")]
    LoadContext(String),
    /// Failed to load the cluster of context
    #[error("failed to load the cluster of context: {0}")]
    LoadClusterOfContext(String),
    /// Failed to find named user
    #[error("failed to find named user: {0}")]
    FindUser(String),
    /// Cluster url is missing on selected cluster
    #[error("cluster url is missing on selected cluster")]
    MissingClusterUrl,
    /// Failed to parse cluster uri
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),
    #[error("build tls config failed, {0}")]
    Tls(#[from] super::tls::Error),
    /// Failed to load client certificate
    #[error("failed to load client certificate")]
    LoadClientCertificate(#[source] LoadDataError),
    /// Failed to load client key
    #[error("failed to load client key")]
    LoadClientKey(#[source] LoadDataError),
    /// Failed to load certificate authority
    #[error("failed to load certificate authority")]
    LoadCertificateAuthority(#[source] LoadDataError),
    /// Invalid private key
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] rustls::Error),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    username: Option<String>,
    password: Option<String>,

    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,

    client_certificate: Option<PathBuf>,
    /// Base64 PEM, overrides `client_certificate`
    client_certificate_data: Option<String>,

    client_key: Option<PathBuf>,
    /// Base64 PEM, overrides `client_key`
    client_key_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    /// https://hostname:port
    server: Option<String>,

    #[serde(default)]
    insecure_skip_tls_verify: bool,

    certificate_authority: Option<PathBuf>,
    /// Base64 PEM, overrides `certificate_authority`
    certificate_authority_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Context {
    cluster: String,
    user: String,
    namespace: Option<String>,
}

/// An entry of one of the named lists of a kubeconfig.
#[derive(Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context", alias = "user")]
    value: Option<T>,
}

/// The fields of a kubeconfig (`~/.kube/config`) this client needs.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeConfig {
    clusters: Vec<Named<Cluster>>,
    users: Vec<Named<AuthInfo>>,
    contexts: Vec<Named<Context>>,
    current_context: Option<String>,
}

fn find<T: Clone>(entries: &[Named<T>], name: &str) -> Option<T> {
    entries
        .iter()
        .find(|entry| entry.name == name)
        .and_then(|entry| entry.value.clone())
}

impl KubeConfig {
    /// Resolve the cluster and user of the current context.
    fn current(&self) -> Result<(Context, Cluster, AuthInfo), Error> {
        let name = self
            .current_context
            .as_deref()
            .ok_or(Error::CurrentContextNotSet)?;
        let context =
            find(&self.contexts, name).ok_or_else(|| Error::LoadContext(name.to_string()))?;
        let cluster = find(&self.clusters, &context.cluster)
            .ok_or_else(|| Error::LoadClusterOfContext(context.cluster.clone()))?;
        let auth_info = find(&self.users, &context.user)
            .ok_or_else(|| Error::FindUser(context.user.clone()))?;

        Ok((context, cluster, auth_info))
    }
}

/// Load the current context of a kubeconfig file.
pub fn from_config(path: impl AsRef<Path>) -> Result<Config, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|err| Error::ReadFile(err, path.into()))?;
    let config = serde_yaml::from_slice::<KubeConfig>(&data).map_err(Error::Parse)?;
    let (context, cluster, auth_info) = config.current()?;

    let cluster_url = cluster
        .server
        .as_deref()
        .ok_or(Error::MissingClusterUrl)?
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUri)?;

    Ok(Config {
        cluster_url,
        default_namespace: context.namespace.unwrap_or_else(|| "default".to_string()),
        tls: tls_config(&cluster, &auth_info)?,
        auth: auth(auth_info)?,
        proxy_url: None,
    })
}

fn tls_config(cluster: &Cluster, auth_info: &AuthInfo) -> Result<ClientConfig, Error> {
    let root_store = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
        (None, None) => native_roots()?,
        (data, file) => {
            let pem = load_base64_or_file(data.as_ref(), file.as_ref())
                .map_err(Error::LoadCertificateAuthority)?;
            root_store_from_pem(&pem)?
        }
    };

    let builder = ClientConfig::builder().with_root_certificates(root_store);
    let mut tls = if auth_info.client_certificate_data.is_some()
        || auth_info.client_certificate.is_some()
    {
        let client_cert = load_base64_or_file(
            auth_info.client_certificate_data.as_ref(),
            auth_info.client_certificate.as_ref(),
        )
        .map_err(Error::LoadClientCertificate)?;
        let mut identity = load_base64_or_file(
            auth_info.client_key_data.as_ref(),
            auth_info.client_key.as_ref(),
        )
        .map_err(Error::LoadClientKey)?;
        identity.extend_from_slice(&client_cert);

        let (chain, key) = client_auth(&identity)?;
        builder
            .with_client_auth_cert(chain, key)
            .map_err(Error::InvalidPrivateKey)?
    } else {
        builder.with_no_client_auth()
    };

    if cluster.insecure_skip_tls_verify {
        tls.dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification));
    }

    Ok(tls)
}

fn auth(auth_info: AuthInfo) -> Result<Auth, Error> {
    let auth = match auth_info {
        AuthInfo {
            username: Some(username),
            password: Some(password),
            ..
        } => Auth::Basic { username, password },
        AuthInfo {
            token_file: Some(path),
            ..
        } => {
            let token =
                RefreshableToken::new(path.clone()).map_err(|err| Error::ReadFile(err, path))?;
            Auth::RefreshableToken(token)
        }
        AuthInfo {
            token: Some(token), ..
        } => Auth::Bearer { token },
        _ => Auth::None,
    };

    Ok(auth)
}

fn load_base64_or_file(
    data: Option<&String>,
    file: Option<&PathBuf>,
) -> Result<Vec<u8>, LoadDataError> {
    if let Some(data) = data {
        return decode_base64(data);
    }

    match file {
        Some(path) => {
            std::fs::read(path).map_err(|err| LoadDataError::ReadFile(err, path.clone()))
        }
        None => Err(LoadDataError::MissingDataOrFile),
    }
}

#[inline]
fn decode_base64(value: impl AsRef<[u8]>) -> Result<Vec<u8>, LoadDataError> {
    use base64::Engine;

    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(LoadDataError::DecodeBase64)
}

#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        tracing::warn!(message = "server certificate verification skipped");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
