use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::STANDARD};
use codec::{
    Error as CodecError,
    crypto::{Password, PasswordAlgorithm, generate_password, hmac_sha1_raw},
    message::{
        Message,
        attributes::{PasswordAlgorithmAttr, UserName},
    },
};
use rand::Rng;

/// Why a TURN request failed the ephemeral-secret check. The client only
/// ever sees a fresh 401 + NONCE either way; the distinction exists so the
/// dispatch layer can decide what's worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingUsername,
    Expired,
    MissingIntegrity,
    IntegrityMismatch,
}

/// Derives the TURN-REST-API ephemeral credential:
/// `password = base64(HMAC-SHA1(secret, username))`, then the usual
/// long-term-credential key `MD5/SHA256(username:realm:password)`.
pub fn ephemeral_password(
    username: &str,
    secret: &str,
    realm: &str,
    algorithm: PasswordAlgorithm,
) -> Password {
    let mac = hmac_sha1_raw(secret.as_bytes(), &[username.as_bytes()])
        .expect("hmac over an in-memory key never fails");
    let password = STANDARD.encode(mac);
    generate_password(username, &password, realm, algorithm)
}

/// A `<unix-seconds>:<label>`-prefixed username carries its own expiry;
/// anything else never expires on its own.
fn is_expired(username: &str) -> bool {
    let Some((prefix, _)) = username.split_once(':') else {
        return false;
    };

    let Ok(expiry) = prefix.parse::<u64>() else {
        return false;
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    expiry < now
}

/// The TURN long-term-credential check, specialised to an ephemeral shared
/// secret: there's no credential store, the password is always derivable
/// from `secret`. Covers USERNAME presence, the expiry prefix, and
/// MESSAGE-INTEGRITY verification in one pass.
pub fn authenticate<'a>(
    message: &Message<'a>,
    secret: &str,
    realm: &str,
) -> Result<(&'a str, Password), AuthFailure> {
    let username = message
        .get::<UserName>()
        .ok_or(AuthFailure::MissingUsername)?;

    if is_expired(username) {
        return Err(AuthFailure::Expired);
    }

    let algorithm = message
        .get::<PasswordAlgorithmAttr>()
        .unwrap_or(PasswordAlgorithm::Md5);

    let password = ephemeral_password(username, secret, realm, algorithm);

    message.checksum(&password).map_err(|err| match err {
        CodecError::NotFoundIntegrity => AuthFailure::MissingIntegrity,
        _ => AuthFailure::IntegrityMismatch,
    })?;

    Ok((username, password))
}

/// A fresh per-response nonce. Freshness isn't tracked or validated beyond
/// presence: every 401 mints a new one rather than checking it against a
/// previously issued value.
pub fn fresh_nonce() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..16)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use codec::message::{MessageEncoder, methods::ALLOCATE_REQUEST};

    #[test]
    fn ephemeral_password_matches_the_turn_rest_api_derivation() {
        let mac = hmac_sha1_raw(b"topsecret".as_slice(), &[b"1893456000:alice".as_slice()])
            .unwrap();
        let expected = generate_password(
            "1893456000:alice",
            &STANDARD.encode(mac),
            "example.org",
            PasswordAlgorithm::Md5,
        );

        let got = ephemeral_password(
            "1893456000:alice",
            "topsecret",
            "example.org",
            PasswordAlgorithm::Md5,
        );

        assert_eq!(got.as_ref(), expected.as_ref());
    }

    #[test]
    fn rejects_an_expired_username_prefix() {
        assert!(is_expired("0:alice"));
        assert!(!is_expired("1893456000:alice"));
        assert!(!is_expired("alice"));
    }

    #[test]
    fn authenticate_round_trips_with_the_derived_password() {
        let token: [u8; 12] = *b"ABCDEFGHIJKL";
        let mut buf = BytesMut::with_capacity(128);
        let password = ephemeral_password("alice", "topsecret", "example.org", PasswordAlgorithm::Md5);

        {
            let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
            message.append::<UserName>("alice");
            message.flush(Some(&password)).unwrap();
        }

        let mut attributes = codec::Attributes::default();
        let decoded = Message::decode(&buf, &mut attributes).unwrap();
        let (username, _) = authenticate(&decoded, "topsecret", "example.org").unwrap();
        assert_eq!(username, "alice");
    }

    #[test]
    fn authenticate_rejects_a_missing_username() {
        let token: [u8; 12] = *b"ABCDEFGHIJKL";
        let mut buf = BytesMut::with_capacity(64);
        {
            let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
            message.flush(None).unwrap();
        }

        let mut attributes = codec::Attributes::default();
        let decoded = Message::decode(&buf, &mut attributes).unwrap();
        assert_eq!(
            authenticate(&decoded, "topsecret", "example.org").unwrap_err(),
            AuthFailure::MissingUsername
        );
    }
}
