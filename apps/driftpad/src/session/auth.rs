use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

/// Challenge/response capability shared by both ends of the handshake. The
/// client uses `respond_to_challenge` and `is_version_compatible`; the
/// host-side operations exist so loopback fixtures can speak the same
/// dialect.
pub trait AuthenticationHandler: Send + Sync {
    fn generate_challenge(&self) -> Vec<u8>;
    fn respond_to_challenge(&self, password: &str, nonce: &[u8]) -> Vec<u8>;
    fn validate_response(&self, password: &str, nonce: &[u8], response: &[u8]) -> bool;
    fn is_version_compatible(&self, server_version: &str) -> bool;
}

/// HMAC-SHA-256 over the nonce, keyed by the credential. Host revisions are
/// plain integers; anything unparsable is treated as incompatible.
pub struct HmacAuthenticator {
    min_host_revision: u32,
}

impl HmacAuthenticator {
    pub fn new(min_host_revision: u32) -> Self {
        Self { min_host_revision }
    }

    fn mac(password: &str, nonce: &[u8]) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(password.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(nonce);
        mac
    }
}

impl AuthenticationHandler for HmacAuthenticator {
    fn generate_challenge(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn respond_to_challenge(&self, password: &str, nonce: &[u8]) -> Vec<u8> {
        Self::mac(password, nonce).finalize().into_bytes().to_vec()
    }

    fn validate_response(&self, password: &str, nonce: &[u8], response: &[u8]) -> bool {
        Self::mac(password, nonce).verify_slice(response).is_ok()
    }

    fn is_version_compatible(&self, server_version: &str) -> bool {
        server_version
            .trim()
            .parse::<u32>()
            .map(|revision| revision >= self.min_host_revision)
            .unwrap_or(false)
    }
}
