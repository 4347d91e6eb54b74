use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for `auth_date`, in seconds.
pub const DEFAULT_MAX_AUTH_AGE: i64 = 86_400;

/// Telegram signs initData with HMAC-SHA256. The signing key is itself
/// derived from the bot token: HMAC-SHA256(key="WebAppData", msg=token).
/// The check-string is every `key=value` pair except `hash`, sorted
/// lexicographically and joined with newlines. Nothing downstream may
/// trust a payload that has not passed this check.
pub fn verify(raw: &str, bot_token: &str, max_age_seconds: i64) -> Result<Principal, AuthError> {
    verify_at(raw, bot_token, max_age_seconds, Utc::now().timestamp())
}

/// Clock-injected variant of [`verify`]. Deterministic given inputs.
pub fn verify_at(
    raw: &str,
    bot_token: &str,
    max_age_seconds: i64,
    now_unix: i64,
) -> Result<Principal, AuthError> {
    assert!(max_age_seconds > 0, "Auth age window must be positive");
    assert!(
        max_age_seconds <= 30 * 86_400,
        "Auth age window exceeds defensive bound"
    );

    let pairs = parse_pairs(raw)?;

    let given_hash = pairs
        .iter()
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.clone())
        .ok_or(AuthError::MissingHash)?;

    // Re-sort regardless of the order the client transmitted the fields;
    // the protocol's canonical form is the sorted one.
    let mut check_pairs: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key != "hash")
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    check_pairs.sort();
    let check_string = check_pairs.join("\n");

    let mut secret_key =
        HmacSha256::new_from_slice(b"WebAppData").expect("HMAC accepts any key size");
    secret_key.update(bot_token.as_bytes());
    let secret_key = secret_key.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).expect("HMAC accepts any key size");
    mac.update(check_string.as_bytes());

    let given_bytes = hex::decode(given_hash.trim()).map_err(|_| AuthError::BadSignature)?;
    // verify_slice is constant-time, unlike the string compare the
    // upstream JS implementation used.
    mac.verify_slice(&given_bytes)
        .map_err(|_| AuthError::BadSignature)?;

    let auth_date = pairs
        .iter()
        .find(|(key, _)| key == "auth_date")
        .and_then(|(_, value)| value.parse::<i64>().ok());
    if let Some(auth_date) = auth_date {
        let age = now_unix - auth_date;
        if age > max_age_seconds {
            return Err(AuthError::Expired { age_seconds: age });
        }
    }

    // A malformed user blob downgrades to "no user" rather than failing
    // an otherwise valid signature.
    let user = pairs
        .iter()
        .find(|(key, _)| key == "user")
        .and_then(|(_, value)| serde_json::from_str::<TelegramUser>(value).ok());

    Ok(Principal { auth_date, user })
}

fn parse_pairs(raw: &str) -> Result<Vec<(String, String)>, AuthError> {
    if raw.trim().is_empty() {
        return Err(AuthError::MalformedPayload);
    }
    let pairs: Vec<(String, String)> = raw
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let decoded = urlencoding::decode(value).ok()?;
            Some((key.to_string(), decoded.into_owned()))
        })
        .collect();
    if pairs.is_empty() {
        return Err(AuthError::MalformedPayload);
    }
    assert!(pairs.len() <= 64, "initData field count exceeds bounds");
    Ok(pairs)
}

/// The verified identity. Only [`verify`] constructs one.
#[derive(Debug, Clone)]
pub struct Principal {
    pub auth_date: Option<i64>,
    pub user: Option<TelegramUser>,
}

impl Principal {
    pub fn tg_id(&self) -> Option<i64> {
        self.user.as_ref().map(|user| user.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("initData payload is empty or unparsable")]
    MalformedPayload,
    #[error("initData payload has no hash field")]
    MissingHash,
    #[error("initData signature mismatch")]
    BadSignature,
    #[error("initData is {age_seconds} seconds old")]
    Expired { age_seconds: i64 },
}

impl AuthError {
    /// Stable machine-readable code surfaced to clients. Verification
    /// internals never leak past this.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload => "no_init_data",
            Self::MissingHash => "no_hash",
            Self::BadSignature => "bad_hash",
            Self::Expired { .. } => "expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "110201543:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";

    /// Signs `key=value` pairs the way Telegram does, appending the hash
    /// field. Values are expected pre-encoded as they would travel.
    fn sign(pairs: &[(&str, &str)], token: &str) -> String {
        let mut check: Vec<String> = pairs
            .iter()
            .map(|(key, value)| {
                let decoded = urlencoding::decode(value).unwrap();
                format!("{key}={decoded}")
            })
            .collect();
        check.sort();
        let check_string = check.join("\n");

        let mut secret = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret.update(token.as_bytes());
        let secret = secret.finalize().into_bytes();
        let mut mac = HmacSha256::new_from_slice(&secret).unwrap();
        mac.update(check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let mut raw: Vec<String> = pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        raw.push(format!("hash={hash}"));
        raw.join("&")
    }

    const USER_ENCODED: &str = "%7B%22id%22%3A42%2C%22first_name%22%3A%22Ann%22%7D";

    #[test]
    fn valid_payload_verifies() {
        let now = 1_755_000_000;
        let auth_date = (now - 60).to_string();
        let raw = sign(
            &[("auth_date", &auth_date), ("user", USER_ENCODED)],
            BOT_TOKEN,
        );
        let principal = verify_at(&raw, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now).unwrap();
        assert_eq!(principal.tg_id(), Some(42));
        assert_eq!(
            principal.user.unwrap().first_name.as_deref(),
            Some("Ann")
        );
    }

    #[test]
    fn field_order_does_not_matter() {
        let now = 1_755_000_000;
        let auth_date = (now - 60).to_string();
        let raw = sign(
            &[("user", USER_ENCODED), ("auth_date", &auth_date)],
            BOT_TOKEN,
        );
        // The signature was computed over the sorted form, so a payload
        // transmitted in any order must still verify.
        let reordered = {
            let mut parts: Vec<&str> = raw.split('&').collect();
            parts.reverse();
            parts.join("&")
        };
        assert!(verify_at(&raw, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now).is_ok());
        assert!(verify_at(&reordered, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = 1_755_000_000;
        let auth_date = (now - 60).to_string();
        let raw = sign(
            &[("auth_date", &auth_date), ("user", USER_ENCODED)],
            BOT_TOKEN,
        );
        let tampered = raw.replace("auth_date", "auth_datf");
        assert!(matches!(
            verify_at(&tampered, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let now = 1_755_000_000;
        let auth_date = (now - 60).to_string();
        let raw = sign(&[("auth_date", &auth_date)], BOT_TOKEN);
        assert!(matches!(
            verify_at(&raw, "other-token", DEFAULT_MAX_AUTH_AGE, now),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn expiry_boundary() {
        let now = 1_755_000_000;
        let stale = (now - DEFAULT_MAX_AUTH_AGE - 1).to_string();
        let fresh = (now - DEFAULT_MAX_AUTH_AGE + 1).to_string();

        let raw = sign(&[("auth_date", &stale)], BOT_TOKEN);
        assert!(matches!(
            verify_at(&raw, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now),
            Err(AuthError::Expired { .. })
        ));

        let raw = sign(&[("auth_date", &fresh)], BOT_TOKEN);
        assert!(verify_at(&raw, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now).is_ok());
    }

    #[test]
    fn missing_hash() {
        assert!(matches!(
            verify_at("auth_date=1", BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, 0),
            Err(AuthError::MissingHash)
        ));
    }

    #[test]
    fn empty_payload() {
        assert!(matches!(
            verify_at("", BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, 0),
            Err(AuthError::MalformedPayload)
        ));
        assert!(matches!(
            verify_at("garbage", BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, 0),
            Err(AuthError::MalformedPayload)
        ));
    }

    #[test]
    fn unparsable_user_downgrades_to_none() {
        let now = 1_755_000_000;
        let raw = sign(&[("user", "not-json")], BOT_TOKEN);
        let principal = verify_at(&raw, BOT_TOKEN, DEFAULT_MAX_AUTH_AGE, now).unwrap();
        assert!(principal.user.is_none());
        assert_eq!(principal.tg_id(), None);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AuthError::MalformedPayload.code(), "no_init_data");
        assert_eq!(AuthError::MissingHash.code(), "no_hash");
        assert_eq!(AuthError::BadSignature.code(), "bad_hash");
        assert_eq!(AuthError::Expired { age_seconds: 1 }.code(), "expired");
    }
}
