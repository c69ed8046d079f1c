// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! TLS bridge.
//!
//! Builds the rustls client configuration demanded by the `sslMode`:
//! PREFERRED/REQUIRED/TUNNEL encrypt without verification, VERIFY_CA checks
//! the chain but not the hostname, VERIFY_IDENTITY checks both.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use crate::error::{Result, TlsError};
use crate::opts::{SslMode, SslOpts};

/// Accepts any certificate. Used for the modes that only want encryption.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Verifies the chain through webpki but tolerates a hostname mismatch.
#[derive(Debug)]
struct SkipHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for SkipHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(err))
                if matches!(
                    err,
                    CertificateError::NotValidForName
                        | CertificateError::NotValidForNameContext { .. }
                ) =>
            {
                Ok(ServerCertVerified::assertion())
            }
            Err(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(TlsError::Pem)?;
    let mut reader = BufReader::new(file);
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        certs.push(cert.map_err(TlsError::Pem)?);
    }
    Ok(certs)
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(TlsError::Pem)?;
    let mut reader = BufReader::new(file);
    match rustls_pemfile::private_key(&mut reader).map_err(TlsError::Pem)? {
        Some(key) => Ok(key),
        None => Err(TlsError::Pem(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no private key in file",
        ))
        .into()),
    }
}

fn root_store(ssl_opts: &SslOpts) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ssl_opts.root_cert_path() {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(TlsError::Rustls)?;
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }
    Ok(roots)
}

fn protocol_versions(ssl_opts: &SslOpts) -> Vec<&'static rustls::SupportedProtocolVersion> {
    let requested = ssl_opts.tls_versions();
    if requested.is_empty() {
        return vec![&rustls::version::TLS13, &rustls::version::TLS12];
    }

    let mut versions = Vec::new();
    for version in requested {
        match version.as_str() {
            "TLSv1.3" => versions.push(&rustls::version::TLS13),
            "TLSv1.2" => versions.push(&rustls::version::TLS12),
            // TLS 1.0/1.1 are unavailable in the TLS stack; ignore them
            // here so a fallback list still yields 1.2/1.3.
            _ => (),
        }
    }
    if versions.is_empty() {
        versions = vec![&rustls::version::TLS13, &rustls::version::TLS12];
    }
    versions
}

/// Builds a connector for the given mode.
pub(crate) fn build_connector(ssl_mode: SslMode, ssl_opts: &SslOpts) -> Result<TlsConnector> {
    let versions = protocol_versions(ssl_opts);
    let builder = ClientConfig::builder_with_protocol_versions(&versions);

    let builder = if ssl_mode.verify_ca() {
        let roots = Arc::new(root_store(ssl_opts)?);
        if ssl_mode.verify_identity() {
            builder.with_root_certificates(roots)
        } else {
            let inner = WebPkiServerVerifier::builder(roots)
                .build()
                .map_err(|e| TlsError::Rustls(rustls::Error::General(e.to_string())))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipHostnameVerifier { inner }))
        }
    } else {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
    };

    let config = match (ssl_opts.client_cert_path(), ssl_opts.client_key_path()) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_key(key_path)?)
            .map_err(TlsError::Rustls)?,
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Resolves the SNI name for the target host.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_owned()).map_err(|_| {
        TlsError::InvalidDnsName {
            name: host.to_owned(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_connectors_for_every_mode() {
        let ssl_opts = SslOpts::default();
        for mode in [
            SslMode::Preferred,
            SslMode::Required,
            SslMode::Tunnel,
            SslMode::VerifyCa,
            SslMode::VerifyIdentity,
        ] {
            build_connector(mode, &ssl_opts).unwrap();
        }
    }

    #[test]
    fn should_resolve_dns_and_ip_names() {
        assert!(server_name("db.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("bad name!").is_err());
    }

    #[test]
    fn unknown_tls_versions_fall_back_to_defaults() {
        let mut ssl_opts = SslOpts::default();
        ssl_opts.set_tls_versions(vec!["TLSv1.0".into(), "TLSv1.1".into()]);
        assert_eq!(protocol_versions(&ssl_opts).len(), 2);

        ssl_opts.set_tls_versions(vec!["TLSv1.3".into()]);
        assert_eq!(protocol_versions(&ssl_opts).len(), 1);
    }
}
