// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! RSA password encryption for the caching_sha2_password and sha256_password
//! full authentication paths.

use rand::rngs::OsRng;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Oaep, Pkcs1v15Encrypt, RsaPublicKey};
use sha1::Sha1;

use std::{error::Error, fmt, io};

/// Error of a public-key parse or encrypt operation.
#[derive(Debug)]
pub struct RsaError(rsa::Error);

impl fmt::Display for RsaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSA error: {}", self.0)
    }
}

impl Error for RsaError {}

impl From<RsaError> for io::Error {
    fn from(err: RsaError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Parses a PEM public key as sent by the server in response to a public key
/// request.
///
/// Servers emit either SPKI ("PUBLIC KEY") or PKCS#1 ("RSA PUBLIC KEY") PEM.
pub fn parse_pub_key(pem: &[u8]) -> io::Result<RsaPublicKey> {
    let pem = std::str::from_utf8(pem)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    match RsaPublicKey::from_public_key_pem(pem) {
        Ok(key) => Ok(key),
        Err(_) => RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid RSA public key: {}", e),
            )
        }),
    }
}

/// Encrypts an obfuscated password with the server's public key.
///
/// OAEP padding (SHA-1 digest, as the server expects) for MySql 8.0.5+;
/// PKCS#1 v1.5 for older sha256_password servers.
pub fn encrypt_pad_oaep(key: &RsaPublicKey, data: &[u8]) -> io::Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
        .map_err(|e| RsaError(e).into())
}

/// Encrypts an obfuscated password with PKCS#1 v1.5 padding.
pub fn encrypt_pad_pkcs1v15(key: &RsaPublicKey, data: &[u8]) -> io::Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .map_err(|e| RsaError(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    #[test]
    fn should_encrypt_with_both_paddings() {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        let data = b"obfuscated password\0";
        let oaep = encrypt_pad_oaep(&public, data).unwrap();
        let pkcs = encrypt_pad_pkcs1v15(&public, data).unwrap();
        assert_eq!(oaep.len(), 128);
        assert_eq!(pkcs.len(), 128);

        let decrypted = private
            .decrypt(rsa::Pkcs1v15Encrypt, &pkcs)
            .unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn should_reject_garbage_pem() {
        assert!(parse_pub_key(b"not a pem").is_err());
    }
}
