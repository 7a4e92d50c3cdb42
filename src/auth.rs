use crate::{
    schemas::{Group, MemberId},
    settings::AuthSettings,
};
use actix_web::{http::header::HeaderValue, HttpRequest};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::num::ParseIntError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq)]
pub enum AuthorizationLevel {
    /// Trusted backend caller holding the shared token.
    Service,
    Member(MemberId),
}

impl AuthorizationLevel {
    pub fn member_id(&self) -> Option<&str> {
        match self {
            AuthorizationLevel::Service => None,
            AuthorizationLevel::Member(id) => Some(id),
        }
    }

    pub fn can_access(&self, group: &Group) -> bool {
        match self {
            AuthorizationLevel::Service => true,
            AuthorizationLevel::Member(id) => group.member(id).is_some(),
        }
    }

    pub fn is_admin_of(&self, group: &Group) -> bool {
        match self {
            AuthorizationLevel::Service => true,
            AuthorizationLevel::Member(id) => group.is_admin(id),
        }
    }
}

/// Payload signed by the login widget, sent as JSON in the `Authorization` header.
#[derive(Deserialize, Debug, Clone)]
pub struct LoginData {
    pub auth_date: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub id: String,
    pub photo_url: Option<String>,
    pub username: Option<String>,
    pub hash: String,
}

pub fn check_authorization_level(
    request: &HttpRequest,
    settings: &AuthSettings,
) -> Option<AuthorizationLevel> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    verify_authorization(authorization, settings, Utc::now())
}

pub fn verify_authorization(
    authorization: &str,
    settings: &AuthSettings,
    now: DateTime<Utc>,
) -> Option<AuthorizationLevel> {
    if settings.bot_token.is_empty() {
        return None;
    }
    if is_service_token(authorization, &settings.bot_token) {
        return Some(AuthorizationLevel::Service);
    }
    let auth_data: LoginData = match serde_json::from_str(authorization) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!("unreadable authorization payload: {err}");
            return None;
        }
    };
    let hash = auth_data
        .hash
        .chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
        .collect::<Result<Vec<u8>, ParseIntError>>()
        .ok()?;
    if signer(&settings.bot_token, &auth_data)?
        .verify_slice(&hash)
        .is_err()
    {
        tracing::warn!(user = %auth_data.id, "login hash mismatch");
        return None;
    }
    if settings.max_age_secs > 0 {
        let issued_at: i64 = auth_data.auth_date.parse().ok()?;
        let age = now.timestamp().saturating_sub(issued_at);
        if age > settings.max_age_secs as i64 {
            tracing::warn!(user = %auth_data.id, age, "login expired");
            return None;
        }
    }
    Some(AuthorizationLevel::Member(auth_data.id))
}

// Compares MACs of both strings so the check runs in constant time
fn is_service_token(authorization: &str, bot_token: &str) -> bool {
    let mac = |value: &str| {
        let mut hasher = HmacSha256::new_from_slice(bot_token.as_bytes()).ok()?;
        hasher.update(value.as_bytes());
        Some(hasher)
    };
    match (mac(authorization), mac(bot_token)) {
        (Some(given), Some(expected)) => given
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

// The data-check string: present fields as sorted `key=value` lines
fn data_check_string(auth_data: &LoginData) -> String {
    let hash_content = vec![
        ("auth_date", Some(auth_data.auth_date.as_str())),
        ("first_name", auth_data.first_name.as_deref()),
        ("id", Some(auth_data.id.as_str())),
        ("last_name", auth_data.last_name.as_deref()),
        ("photo_url", auth_data.photo_url.as_deref()),
        ("username", auth_data.username.as_deref()),
    ]
    .into_iter()
    .filter_map(|pair| pair.1.map(|val| format!("{}={}", pair.0, val)))
    .collect::<Vec<_>>();
    hash_content.join("\n")
}

// Keyed with SHA256 of the bot token
fn signer(bot_token: &str, auth_data: &LoginData) -> Option<HmacSha256> {
    let mut sha256_hasher = Sha256::new();
    sha256_hasher.update(bot_token.as_bytes());
    let bot_hash = sha256_hasher.finalize();

    let mut hmac_hasher = HmacSha256::new_from_slice(&bot_hash).ok()?;
    hmac_hasher.update(data_check_string(auth_data).as_bytes());
    Some(hmac_hasher)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const TOKEN: &str = "123456:bot-secret";

    fn settings(max_age_secs: u64) -> AuthSettings {
        AuthSettings {
            bot_token: TOKEN.to_string(),
            max_age_secs,
        }
    }

    fn signed_login(id: &str, auth_date: i64) -> String {
        let mut data = LoginData {
            auth_date: auth_date.to_string(),
            first_name: Some("Xavi".to_string()),
            last_name: None,
            id: id.to_string(),
            photo_url: None,
            username: Some("xavi".to_string()),
            hash: String::new(),
        };
        data.hash = signer(TOKEN, &data)
            .unwrap()
            .finalize()
            .into_bytes()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        serde_json::json!({
            "auth_date": data.auth_date,
            "first_name": data.first_name,
            "id": data.id,
            "username": data.username,
            "hash": data.hash,
        })
        .to_string()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn service_token_grants_service_level() {
        assert_eq!(
            verify_authorization(TOKEN, &settings(0), now()),
            Some(AuthorizationLevel::Service)
        );
    }

    #[test]
    fn near_miss_service_token_is_rejected() {
        assert!(is_service_token(TOKEN, TOKEN));
        assert!(!is_service_token("123456:bot-secreT", TOKEN));
        assert!(!is_service_token("123456:bot-secret ", TOKEN));
        assert_eq!(
            verify_authorization("123456:bot-secreT", &settings(0), now()),
            None
        );
    }

    #[test]
    fn signed_login_grants_member_level() {
        let header = signed_login("42", now().timestamp() - 60);
        assert_eq!(
            verify_authorization(&header, &settings(3600), now()),
            Some(AuthorizationLevel::Member("42".to_string()))
        );
    }

    #[test]
    fn tampered_login_is_rejected() {
        let header = signed_login("42", now().timestamp()).replace("\"42\"", "\"43\"");
        assert_eq!(verify_authorization(&header, &settings(0), now()), None);
    }

    #[test]
    fn stale_login_is_rejected() {
        let header = signed_login("42", now().timestamp() - 7200);
        assert_eq!(verify_authorization(&header, &settings(3600), now()), None);
        assert!(verify_authorization(&header, &settings(0), now()).is_some());
    }

    #[test]
    fn garbage_and_missing_token_are_rejected() {
        assert_eq!(verify_authorization("nonsense", &settings(0), now()), None);
        let open = AuthSettings {
            bot_token: String::new(),
            max_age_secs: 0,
        };
        assert_eq!(verify_authorization("", &open, now()), None);
    }

    #[test]
    fn data_check_string_skips_missing_fields() {
        let data = LoginData {
            auth_date: "1700000000".to_string(),
            first_name: None,
            last_name: None,
            id: "7".to_string(),
            photo_url: None,
            username: Some("neo".to_string()),
            hash: String::new(),
        };
        assert_eq!(
            data_check_string(&data),
            "auth_date=1700000000\nid=7\nusername=neo"
        );
    }
}
