// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Authentication plugin negotiation.
//!
//! The first pass is computed from the handshake nonce
//! ([`AuthPlugin::gen_data`]); this module drives the continuation rounds:
//! AUTH_MORE_DATA dispatch, the caching_sha2 fast/full fork and the RSA
//! public-key exchange used on insecure transports.

use crate::crypto;
use crate::error::{DriverError, Error, Result};
use crate::packets::AuthPlugin;
use crate::scramble::xor_rotating;

/// caching_sha2_password wire bytes.
mod caching_sha2 {
    /// Client request for the server's RSA public key.
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth succeeded; the final OK follows.
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed: cleartext over TLS or RSA otherwise.
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// What to do after an AUTH_MORE_DATA message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AuthStep {
    /// Nothing to send; the terminal OK/ERR follows.
    Continue,
    /// Send this payload as the next auth response.
    Respond(Vec<u8>),
}

/// First-pass auth data for the handshake response.
///
/// Plugins that can only run over a secure transport are rejected here when
/// the transport is not trusted.
pub(crate) fn first_auth_data(
    plugin: &AuthPlugin<'_>,
    pass: Option<&str>,
    nonce: &[u8],
    trusted_transport: bool,
) -> Result<Option<Vec<u8>>> {
    if plugin.requires_secure_transport() && !trusted_transport {
        return Err(Error::Driver(DriverError::AuthPluginRequiresSecureTransport {
            plugin: "mysql_clear_password",
        }));
    }

    match plugin {
        AuthPlugin::Other(name) => Err(Error::Driver(DriverError::UnsupportedAuthPlugin {
            name: String::from_utf8_lossy(name).into_owned(),
        })),
        // sha256_password can short-circuit to cleartext over a trusted
        // transport; otherwise it asks for the server's public key.
        AuthPlugin::Sha256Password if trusted_transport => {
            Ok(Some(cleartext_password(pass)))
        }
        plugin => Ok(plugin.gen_data(pass, nonce)),
    }
}

/// Continuation dispatch for AUTH_MORE_DATA.
pub(crate) fn auth_more_data_step(
    plugin: &AuthPlugin<'_>,
    data: &[u8],
    pass: Option<&str>,
    nonce: &[u8],
    trusted_transport: bool,
) -> Result<AuthStep> {
    match plugin {
        AuthPlugin::CachingSha2Password => match data {
            [caching_sha2::FAST_AUTH_SUCCESS] => Ok(AuthStep::Continue),
            [caching_sha2::PERFORM_FULL_AUTH] => {
                if trusted_transport {
                    Ok(AuthStep::Respond(cleartext_password(pass)))
                } else {
                    Ok(AuthStep::Respond(vec![caching_sha2::REQUEST_PUBLIC_KEY]))
                }
            }
            // the server's RSA public key in PEM
            pem => {
                let key = crypto::parse_pub_key(pem)?;
                let obfuscated = xor_rotating(pass.unwrap_or("").as_bytes(), nonce);
                let encrypted = crypto::encrypt_pad_oaep(&key, &obfuscated)?;
                Ok(AuthStep::Respond(encrypted))
            }
        },
        AuthPlugin::Sha256Password => {
            // the server answers the placeholder with its public key
            let key = crypto::parse_pub_key(data)?;
            let obfuscated = xor_rotating(pass.unwrap_or("").as_bytes(), nonce);
            let encrypted = crypto::encrypt_pad_pkcs1v15(&key, &obfuscated)?;
            Ok(AuthStep::Respond(encrypted))
        }
        // single-pass plugins have nothing to add
        AuthPlugin::MysqlNativePassword
        | AuthPlugin::MysqlOldPassword
        | AuthPlugin::MysqlClearPassword => Ok(AuthStep::Continue),
        AuthPlugin::Other(name) => Err(Error::Driver(DriverError::UnsupportedAuthPlugin {
            name: String::from_utf8_lossy(name).into_owned(),
        })),
    }
}

fn cleartext_password(pass: Option<&str>) -> Vec<u8> {
    let mut data = Vec::from(pass.unwrap_or("").as_bytes());
    data.push(0);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    const NONCE: &[u8] = &[
        0x4e, 0x52, 0x33, 0x48, 0x50, 0x3a, 0x71, 0x49, 0x59, 0x61, 0x5f, 0x39, 0x3d, 0x64, 0x62,
        0x3f, 0x53, 0x64, 0x7b, 0x60,
    ];

    #[test]
    fn fast_auth_success_continues_silently() {
        let step = auth_more_data_step(
            &AuthPlugin::CachingSha2Password,
            &[0x03],
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap();
        assert_eq!(step, AuthStep::Continue);
    }

    #[test]
    fn full_auth_over_trusted_transport_sends_cleartext() {
        let step = auth_more_data_step(
            &AuthPlugin::CachingSha2Password,
            &[0x04],
            Some("secret"),
            NONCE,
            true,
        )
        .unwrap();
        assert_eq!(step, AuthStep::Respond(b"secret\0".to_vec()));
    }

    #[test]
    fn full_auth_over_insecure_transport_requests_public_key() {
        let step = auth_more_data_step(
            &AuthPlugin::CachingSha2Password,
            &[0x04],
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap();
        assert_eq!(step, AuthStep::Respond(vec![0x02]));
    }

    #[test]
    fn public_key_response_is_encrypted() {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let step = auth_more_data_step(
            &AuthPlugin::CachingSha2Password,
            pem.as_bytes(),
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap();
        match step {
            AuthStep::Respond(data) => assert_eq!(data.len(), 128),
            other => panic!("unexpected step: {:?}", other),
        }

        // the decrypted payload is the rotating-XOR obfuscated password
        if let AuthStep::Respond(data) = auth_more_data_step(
            &AuthPlugin::CachingSha2Password,
            pem.as_bytes(),
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap()
        {
            let decrypted = private
                .decrypt(rsa::Oaep::new::<sha1::Sha1>(), &data)
                .unwrap();
            assert_eq!(decrypted, xor_rotating(b"secret", NONCE));
        }
    }

    #[test]
    fn sha256_password_uses_pkcs1_padding() {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let step = auth_more_data_step(
            &AuthPlugin::Sha256Password,
            pem.as_bytes(),
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap();
        if let AuthStep::Respond(data) = step {
            let decrypted = private.decrypt(rsa::Pkcs1v15Encrypt, &data).unwrap();
            assert_eq!(decrypted, xor_rotating(b"secret", NONCE));
        } else {
            panic!("expected a response");
        }
    }

    #[test]
    fn clear_password_requires_trusted_transport() {
        let err = first_auth_data(
            &AuthPlugin::MysqlClearPassword,
            Some("secret"),
            NONCE,
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Driver(DriverError::AuthPluginRequiresSecureTransport { .. })
        ));

        let data = first_auth_data(
            &AuthPlugin::MysqlClearPassword,
            Some("secret"),
            NONCE,
            true,
        )
        .unwrap();
        assert_eq!(data, Some(b"secret\0".to_vec()));
    }

    #[test]
    fn unknown_plugins_are_rejected() {
        let plugin = AuthPlugin::from_bytes(b"dialog");
        assert!(matches!(
            first_auth_data(&plugin, Some("x"), NONCE, false),
            Err(Error::Driver(DriverError::UnsupportedAuthPlugin { .. }))
        ));
    }
}
