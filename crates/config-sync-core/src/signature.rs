//! Request signing for servers that require a shared access secret.
//!
//! The server verifies `Authorization = hex(HMAC-SHA1(secret, "{timestamp}\n{path_and_query}"))`
//! together with the `Timestamp` header carrying the same unix-millisecond value.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use time::OffsetDateTime;

/// Header carrying the hex signature.
pub const AUTHORIZATION_HEADER: &str = "Authorization";
/// Header carrying the unix-millisecond timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "Timestamp";

type HmacSha1 = Hmac<Sha1>;

/// Header values attached to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub timestamp: String,
}

/// Signs outbound requests with the configured secret.
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs `path_and_query` using the current wall-clock time.
    pub fn sign_now(&self, path_and_query: &str) -> SignedHeaders {
        self.sign_at(current_unix_millis(), path_and_query)
    }

    /// Signs `path_and_query` as of `timestamp_millis`.
    pub fn sign_at(&self, timestamp_millis: i64, path_and_query: &str) -> SignedHeaders {
        let timestamp = timestamp_millis.to_string();
        SignedHeaders {
            authorization: self.signature(&timestamp, path_and_query),
            timestamp,
        }
    }

    fn signature(&self, timestamp: &str, path_and_query: &str) -> String {
        let mut mac = match HmacSha1::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac keys of any length are valid"),
        };
        mac.update(timestamp.as_bytes());
        mac.update(b"\n");
        mac.update(path_and_query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub(crate) fn current_unix_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_path_and_query_with_timestamp() {
        let signer = Signer::new("test-secret");
        let headers = signer.sign_at(
            1_700_000_000_000,
            "/configs/app1/default/application?releaseKey=&ip=",
        );
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(
            headers.authorization,
            "1aa4aee8b4408621bb6c49fb4d21c4ed18624f0b"
        );
    }

    #[test]
    fn signature_depends_on_timestamp_and_path() {
        let signer = Signer::new("test-secret");
        let base = signer.sign_at(1, "/configs/app1/default/application");
        assert_ne!(
            base.authorization,
            signer.sign_at(2, "/configs/app1/default/application").authorization
        );
        assert_ne!(
            base.authorization,
            signer.sign_at(1, "/configs/app1/default/other").authorization
        );
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", Signer::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn sign_now_uses_current_millis() {
        let before = current_unix_millis();
        let headers = Signer::new("s").sign_now("/notifications/v2");
        let stamped: i64 = headers.timestamp.parse().expect("numeric timestamp");
        assert!(stamped >= before);
    }
}
