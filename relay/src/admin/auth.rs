//! Argon2 password hashing and bearer-session checks for the admin routes.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::HeaderMap;

use super::store::{AdminStore, AdminUser};
use crate::error::RelayError;

pub fn hash_password(password: &str) -> Result<String, RelayError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| RelayError::Internal(format!("salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RelayError::Internal(format!("password hash: {e}")))
}

/// Verifies if a provided password matches a stored Argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Check an email/password pair and open a session.
pub fn login(store: &AdminStore, email: &str, password: &str) -> Result<(AdminUser, String), RelayError> {
    let Some((user, hash)) = store.user_with_hash(email)? else {
        return Err(RelayError::InvalidLogin);
    };
    if !verify_password(password, &hash) {
        return Err(RelayError::InvalidLogin);
    }
    let token = store.create_session(user.id)?;
    Ok((user, token))
}

pub fn require_admin(headers: &HeaderMap, store: &AdminStore) -> Result<AdminUser, RelayError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(RelayError::Unauthorized)?;

    store.session_user(token)?.ok_or(RelayError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_round_trip() {
        let hash = hash_password("Correct horse").unwrap();
        assert!(verify_password("Correct horse", &hash));
        assert!(!verify_password("correct horse", &hash));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "plaintext"));
    }

    #[test]
    fn test_login_and_bearer() {
        let dir = tempfile::tempdir().unwrap();
        let store = AdminStore::open(&dir.path().join("a.sqlite")).unwrap();
        store.seed_admin("ops@example.org", "s3cret", "Super Admin").unwrap();

        assert!(matches!(
            login(&store, "ops@example.org", "wrong"),
            Err(RelayError::InvalidLogin)
        ));
        assert!(matches!(
            login(&store, "nobody@example.org", "s3cret"),
            Err(RelayError::InvalidLogin)
        ));

        let (user, token) = login(&store, "ops@example.org", "s3cret").unwrap();

        let mut headers = HeaderMap::new();
        assert!(matches!(require_admin(&headers, &store), Err(RelayError::Unauthorized)));

        headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        assert_eq!(require_admin(&headers, &store).unwrap(), user);

        headers.insert("authorization", HeaderValue::from_static("Bearer stale"));
        assert!(matches!(require_admin(&headers, &store), Err(RelayError::Unauthorized)));
    }
}
