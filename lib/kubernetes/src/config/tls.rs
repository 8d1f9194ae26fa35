use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_native_certs::CertificateResult;
use thiserror::Error;
use tracing::debug;

/// Errors from Rustls
#[derive(Debug, Error)]
pub enum Error {
    /// Identity PEM is invalid
    #[error("identity PEM is invalid: {0}")]
    InvalidIdentityPem(#[source] rustls::pki_types::pem::Error),

    /// Identity PEM is missing a private key: the key must be PKCS8 or RSA/PKCS1
    #[error("identity PEM is missing a private key: the key must be PKCS8 or RSA/PKCS1")]
    MissingPrivateKey,

    /// Identity PEM is missing certificate
    #[error("identity PEM is missing certificate")]
    MissingCertificate,

    /// Unknown private key format
    #[error("unknown private key format")]
    UnknownPrivateKeyFormat,

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),

    /// Failed to add a root certificate
    #[error("failed to add a root certificate: {0}")]
    AddRootCertificate(#[source] rustls::Error),

    /// Load native certificates failed
    #[error("load native certificates: {0:?}")]
    LoadNativeCertificates(Vec<rustls_native_certs::Error>),
}

/// Split a PEM bundle into the certificate chain and the private key.
pub fn client_auth(
    data: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    use rustls::pki_types::pem::{self, SectionKind};

    let mut cert_chain = Vec::new();
    let mut pkcs8_key = None;
    let mut pkcs1_key = None;
    let mut sec1_key = None;
    let mut reader = std::io::Cursor::new(data);
    while let Some((kind, der)) = pem::from_buf(&mut reader).map_err(Error::InvalidIdentityPem)? {
        match kind {
            SectionKind::Certificate => cert_chain.push(der.into()),
            SectionKind::PrivateKey => pkcs8_key = Some(PrivateKeyDer::Pkcs8(der.into())),
            SectionKind::RsaPrivateKey => pkcs1_key = Some(PrivateKeyDer::Pkcs1(der.into())),
            SectionKind::EcPrivateKey => sec1_key = Some(PrivateKeyDer::Sec1(der.into())),
            _ => return Err(Error::UnknownPrivateKeyFormat),
        }
    }

    let private_key = pkcs8_key
        .or(pkcs1_key)
        .or(sec1_key)
        .ok_or(Error::MissingPrivateKey)?;

    if cert_chain.is_empty() {
        return Err(Error::MissingCertificate);
    }

    Ok((cert_chain, private_key))
}

/// Build a root store from every `CERTIFICATE` block of a PEM bundle.
pub fn root_store_from_pem(data: &[u8]) -> Result<RootCertStore, Error> {
    let mut root_store = RootCertStore::empty();

    for block in pem::parse_many(data).map_err(Error::ParseCertificates)? {
        if block.tag() != "CERTIFICATE" {
            continue;
        }

        root_store
            .add(CertificateDer::from(block.into_contents()))
            .map_err(Error::AddRootCertificate)?;
    }

    Ok(root_store)
}

/// Root store built from the certificates of the platform.
pub fn native_roots() -> Result<RootCertStore, Error> {
    let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
    if !errors.is_empty() {
        return Err(Error::LoadNativeCertificates(errors));
    }

    let mut root_store = RootCertStore::empty();
    for cert in certs {
        if let Err(err) = root_store.add(cert) {
            debug!(
                message = "certificate parse failed",
                %err
            );
        }
    }

    if root_store.is_empty() {
        debug!(message = "no valid native root CA certificates found");
    }

    Ok(root_store)
}
