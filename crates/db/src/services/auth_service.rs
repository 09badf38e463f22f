// Password hashing and session token helpers
use bcrypt::{DEFAULT_COST, hash, verify};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
        hash(password, DEFAULT_COST)
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        verify(password, hash)
    }

    /// New opaque session token. Only its hash is ever stored.
    pub fn generate_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Random value used as the OAuth `state` / CSRF cookie.
    pub fn generate_csrf_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// SHA-256 hex digest of a session token, checked on every request.
    pub fn hash_session_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}
