// src/auth.rs
use crate::models::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SESSION_COOKIE: &str = "session";

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    gen: i64,
    exp: usize,
}

/// A verified session token: the user it was issued to and the user's session
/// generation at the time. Logging out bumps the generation, which retires
/// every token issued before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user: UserId,
    pub generation: i64,
}

/// Signing secret and lifetime of session tokens, plus the work factor for
/// newly stored password hashes.
#[derive(Clone)]
pub struct SessionSettings {
    pub secret: String,
    pub ttl_secs: i64,
    pub password_rounds: u32,
}

// Creates the signed token stored in the session cookie.
pub fn create_token(
    session: Session,
    settings: &SessionSettings,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now().timestamp() + settings.ttl_secs;
    let claims = Claims {
        sub: session.user.0.to_string(),
        gen: session.generation,
        exp: exp.max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.secret.as_bytes()),
    )
}

/// Returns the session a token was issued for, or `None` when the token is
/// malformed, forged or expired. Whether it has been retired is up to the caller.
pub fn verify_token(token: &str, settings: &SessionSettings) -> Option<Session> {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims.sub.parse().ok().map(|id| Session {
            user: UserId(id),
            generation: data.claims.gen,
        }),
        Err(e) => {
            debug!("Rejected session token: {}", e);
            None
        }
    }
}

/// Browser-session cookie: no Max-Age, so it goes away with the browser.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token
    )
}

pub fn clear_session_cookie() -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    )
}

/// Salted PBKDF2-SHA256, stored as `pbkdf2:sha256:<rounds>$<salt>$<hex digest>`.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    let digest = derive(password, &salt, rounds);
    format!("pbkdf2:sha256:{}${}${}", rounds, salt, hex::encode(digest))
}

pub fn check_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (method, salt, expected) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(s), Some(e)) => (m, s, e),
        _ => return false,
    };
    let rounds = match method.strip_prefix("pbkdf2:sha256:").map(str::parse::<u32>) {
        Some(Ok(rounds)) if rounds > 0 => rounds,
        _ => return false,
    };
    let expected = match hex::decode(expected) {
        Ok(bytes) if bytes.len() == KEY_LEN => bytes,
        _ => return false,
    };
    let actual = derive(password, salt, rounds);
    // constant time over the digest
    actual
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn derive(password: &str, salt: &str, rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
    key
}
