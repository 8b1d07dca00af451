//! Throwaway TLS material for receivers and the matching client trust.

use anyhow::{Context, Result, anyhow};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;

/// Hosts every receiver certificate is valid for.
pub const DEFAULT_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// A CA and a server certificate signed by it, all PEM.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem)
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Issues a fresh CA and a server certificate for `hosts`.
///
/// Host entries that parse as IP addresses become IP SANs.
pub fn issue(hosts: &[&str]) -> Result<TlsMaterial> {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).context("CA parameters")?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "sinkproof receiver CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let ca_key = KeyPair::generate().context("generate CA key")?;
    let ca_cert = ca_params.self_signed(&ca_key).context("self-sign CA")?;

    let names: Vec<String> = hosts.iter().map(|h| (*h).to_string()).collect();
    let mut params = CertificateParams::new(names).context("server certificate parameters")?;
    params
        .distinguished_name
        .push(DnType::CommonName, hosts.first().copied().unwrap_or("localhost"));
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let key = KeyPair::generate().context("generate server key")?;
    let cert = params
        .signed_by(&key, &ca_cert, &ca_key)
        .context("sign server certificate")?;

    Ok(TlsMaterial {
        ca_pem: ca_cert.pem(),
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("parse certificates: {e:?}"))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates in PEM bundle"));
    }
    Ok(certs)
}

pub fn server_config(material: &TlsMaterial) -> Result<Arc<ServerConfig>> {
    let certs = parse_certificates(&material.cert_pem)?;
    let key = PrivateKeyDer::from_pem_slice(material.key_pem.as_bytes())
        .map_err(|e| anyhow!("parse private key: {e:?}"))?;
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("server protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("server certificate")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Client config trusting only the CAs in `ca_pem`.
pub fn client_config(ca_pem: &str) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(ca_pem)? {
        roots.add(cert).context("add CA certificate")?;
    }
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("client protocol versions")?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_material_builds_both_configs() {
        let material = issue(DEFAULT_HOSTS).unwrap();
        assert!(material.ca_pem.contains("BEGIN CERTIFICATE"));
        assert!(material.key_pem.contains("PRIVATE KEY"));
        server_config(&material).unwrap();
        client_config(&material.ca_pem).unwrap();
    }

    #[test]
    fn each_issue_has_its_own_ca() {
        let a = issue(DEFAULT_HOSTS).unwrap();
        let b = issue(DEFAULT_HOSTS).unwrap();
        assert_ne!(a.ca_pem, b.ca_pem);
    }

    #[test]
    fn empty_bundle_is_rejected() {
        assert!(client_config("").is_err());
        assert!(client_config("not pem").is_err());
    }

    #[test]
    fn debug_hides_private_key() {
        let material = issue(DEFAULT_HOSTS).unwrap();
        assert!(!format!("{material:?}").contains("PRIVATE KEY"));
    }
}
