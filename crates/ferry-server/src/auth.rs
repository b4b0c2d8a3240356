//! Token verification.
//!
//! The account service (out of scope here) hands clients an opaque token:
//! `base64url(user_id:exp_unix:mac)` where the MAC is a blake3 keyed hash
//! of `user_id:exp_unix` under a shared 32-byte secret. Verification
//! rejects tampered and expired tokens. The issuing half lives here too so
//! tests and operator tooling can mint tokens against the same secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: [u8; 32],
}

impl TokenVerifier {
    /// Derive the MAC key from the configured secret string.
    pub fn new(secret: &str) -> Self {
        Self {
            key: *blake3::hash(secret.as_bytes()).as_bytes(),
        }
    }

    /// Mint a token for `user` valid for `ttl_secs` from now.
    pub fn issue(&self, user: &str, ttl_secs: i64) -> String {
        let exp = Utc::now().timestamp() + ttl_secs;
        let mac = self.mac(user, exp).to_hex();
        URL_SAFE_NO_PAD.encode(format!("{user}:{exp}:{mac}"))
    }

    /// Validate `token` and return the user id it names.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| AuthError::Malformed)?;
        let raw = String::from_utf8(raw).map_err(|_| AuthError::Malformed)?;

        // user ids may themselves contain ':'; the exp and mac never do.
        let mut parts = raw.rsplitn(3, ':');
        let mac = parts.next().ok_or(AuthError::Malformed)?;
        let exp: i64 = parts
            .next()
            .ok_or(AuthError::Malformed)?
            .parse()
            .map_err(|_| AuthError::Malformed)?;
        let user = parts.next().ok_or(AuthError::Malformed)?;
        if user.is_empty() {
            return Err(AuthError::Malformed);
        }

        // blake3::Hash equality is constant-time; compare hashes, not hex.
        let provided = blake3::Hash::from_hex(mac).map_err(|_| AuthError::BadSignature)?;
        if provided != self.mac(user, exp) {
            return Err(AuthError::BadSignature);
        }

        if exp < Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(user.to_string())
    }

    fn mac(&self, user: &str, exp: i64) -> blake3::Hash {
        blake3::keyed_hash(&self.key, format!("{user}:{exp}").as_bytes())
    }
}

/// Parse the stream-auth preamble `AUTH <token>` shared by the TCP and
/// binary-WebSocket transports. Returns the token.
pub fn parse_auth_command(line: &str) -> Option<&str> {
    match line.trim().split_once(' ') {
        Some(("AUTH", token)) if !token.is_empty() => Some(token),
        _ => None,
    }
}
