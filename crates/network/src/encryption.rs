//! # Key Exchange
//!
//! Client half of the login encryption handshake:
//!
//! ```text
//! server → EncryptionRequest(server_id, public_key DER, verify_token)
//! client    secret = 16 random bytes
//! client    [SessionAuthenticator::join(server_hash)]     optional
//! client → EncryptionResponse(rsa(secret), rsa(verify_token))
//! both      AES-128/CFB8 on every following byte
//! ```
//!
//! RSA uses PKCS#1 v1.5 padding. The server hash is the SHA-1 digest of
//! `server_id + secret + public_key` rendered as a signed hexadecimal number.

use crate::cipher::SECRET_LEN;
use botwire_core::{Result, WireError};
use botwire_protocol::packets::{EncryptionRequest, EncryptionResponse};
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};

/// External session service consulted before the response is sent
///
/// Account authentication itself lives outside this crate; implementors
/// post the server hash to whatever session service their accounts use.
pub trait SessionAuthenticator: Send + Sync {
    fn join(&self, server_hash: &str) -> Result<()>;
}

/// Secret and server key of one key exchange
pub struct EncryptionSession {
    secret: [u8; SECRET_LEN],
    public_key: RsaPublicKey,
    public_key_der: Vec<u8>,
    server_id: String,
}

impl EncryptionSession {
    /// Start a key exchange for `request` with a fresh random secret
    pub fn new(request: &EncryptionRequest) -> Result<Self> {
        let mut secret = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(request, secret)
    }

    /// Start a key exchange with a caller-chosen secret
    pub fn with_secret(request: &EncryptionRequest, secret: [u8; SECRET_LEN]) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_der(&request.public_key)
            .map_err(|e| WireError::Encryption(format!("Invalid server public key: {}", e)))?;
        Ok(Self {
            secret,
            public_key,
            public_key_der: request.public_key.clone(),
            server_id: request.server_id.clone(),
        })
    }

    pub fn secret(&self) -> &[u8; SECRET_LEN] {
        &self.secret
    }

    /// Digest the session service expects for this exchange
    pub fn server_hash(&self) -> String {
        server_hash(&self.server_id, &self.secret, &self.public_key_der)
    }

    /// Run the authenticator, if any, with this exchange's server hash
    pub fn authenticate(&self, authenticator: Option<&dyn SessionAuthenticator>) -> Result<()> {
        match authenticator {
            Some(authenticator) => authenticator.join(&self.server_hash()),
            None => Ok(()),
        }
    }

    /// RSA-encrypt the secret and the server's verify token
    pub fn response(&self, verify_token: &[u8]) -> Result<EncryptionResponse> {
        let mut rng = rand::thread_rng();
        let shared_secret = self
            .public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, &self.secret)
            .map_err(|e| WireError::Encryption(format!("Cannot encrypt shared secret: {}", e)))?;
        let verify_token = self
            .public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, verify_token)
            .map_err(|e| WireError::Encryption(format!("Cannot encrypt verify token: {}", e)))?;
        Ok(EncryptionResponse {
            shared_secret,
            verify_token,
        })
    }
}

/// SHA-1 of `server_id + secret + public_key` as a signed hex number
pub fn server_hash(server_id: &str, secret: &[u8], public_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(secret);
    hasher.update(public_key);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());

    let negative = digest[0] & 0x80 != 0;
    if negative {
        // two's complement of the whole 160-bit value
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (sum, overflow) = byte.overflowing_add(1);
                *byte = sum;
                carry = overflow;
            }
        }
    }

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    let trimmed = hex.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };
    if negative {
        format!("-{}", digits)
    } else {
        digits.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    #[test]
    fn test_server_hash_vectors() {
        assert_eq!(server_hash("Notch", b"", b""), "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48");
        assert_eq!(server_hash("jeb_", b"", b""), "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1");
        assert_eq!(server_hash("simon", b"", b""), "88e16a1019277b15d58faf0541e11910eb756f6");
    }

    #[test]
    fn test_response_decrypts_with_private_key() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let der = RsaPublicKey::from(&private_key).to_public_key_der().unwrap();

        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: der.as_bytes().to_vec(),
            verify_token: vec![9, 8, 7, 6],
            should_authenticate: true,
        };
        let session = EncryptionSession::new(&request).unwrap();
        let response = session.response(&request.verify_token).unwrap();

        let secret = private_key.decrypt(Pkcs1v15Encrypt, &response.shared_secret).unwrap();
        assert_eq!(secret, session.secret());
        let token = private_key.decrypt(Pkcs1v15Encrypt, &response.verify_token).unwrap();
        assert_eq!(token, request.verify_token);
    }

    #[test]
    fn test_invalid_public_key() {
        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: vec![1, 2, 3],
            verify_token: vec![],
            should_authenticate: false,
        };
        assert!(matches!(EncryptionSession::new(&request), Err(WireError::Encryption(_))));
    }

    #[test]
    fn test_authenticator_receives_hash() {
        struct Recorder(parking_lot::Mutex<Option<String>>);
        impl SessionAuthenticator for Recorder {
            fn join(&self, server_hash: &str) -> Result<()> {
                *self.0.lock() = Some(server_hash.to_string());
                Ok(())
            }
        }

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let der = RsaPublicKey::from(&private_key).to_public_key_der().unwrap();
        let request = EncryptionRequest {
            server_id: "srv".into(),
            public_key: der.as_bytes().to_vec(),
            verify_token: vec![1],
            should_authenticate: true,
        };
        let session = EncryptionSession::with_secret(&request, [7; SECRET_LEN]).unwrap();
        let recorder = Recorder(parking_lot::Mutex::new(None));
        session.authenticate(Some(&recorder)).unwrap();
        assert_eq!(recorder.0.lock().as_deref(), Some(session.server_hash().as_str()));
        assert!(session.authenticate(None).is_ok());
    }
}
