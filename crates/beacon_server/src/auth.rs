//! Bearer token utilities

use beacon_api::AccessTokenClaims;
use beacon_core::id::UserId;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, decode, encode};

use crate::error::ServerResult;

/// Generate an access token
pub fn generate_access_token(
    user_id: UserId,
    encoding_key: &EncodingKey,
    ttl_seconds: i64,
) -> ServerResult<String> {
    let claims = AccessTokenClaims::new(user_id, ttl_seconds);
    Ok(encode(&Header::default(), &claims, encoding_key)?)
}

/// Validate an access token
pub fn validate_access_token(
    token: &str,
    decoding_key: &DecodingKey,
) -> ServerResult<AccessTokenClaims> {
    let token_data = decode::<AccessTokenClaims>(
        token,
        decoding_key,
        &AccessTokenClaims::validation(),
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_token_round_trip_keeps_subject() {
        let user = UserId::generate();
        let token =
            generate_access_token(user, &EncodingKey::from_secret(b"secret"), 60).unwrap();
        let claims = validate_access_token(&token, &DecodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(claims.sub, user);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token =
            generate_access_token(UserId::generate(), &EncodingKey::from_secret(b"a"), 60).unwrap();
        assert!(validate_access_token(&token, &DecodingKey::from_secret(b"b")).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // beyond the default 60s leeway
        let token = generate_access_token(
            UserId::generate(),
            &EncodingKey::from_secret(b"secret"),
            -3600,
        )
        .unwrap();
        assert!(validate_access_token(&token, &DecodingKey::from_secret(b"secret")).is_err());
    }
}
