//! 消息服务 JWT：服务端 token 与用户 token（HS256，密钥为 API secret）

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::ChatError;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UserClaims {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ServerClaims {
    server: bool,
}

fn sign<T: Serialize>(secret: &str, claims: &T) -> Result<String, ChatError> {
    if secret.is_empty() {
        return Err(ChatError::Config("api secret is empty".to_string()));
    }
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Token(e.to_string()))
}

/// 用户 token：客户端用它连接消息服务
pub fn user_token(
    secret: &str,
    user_id: &str,
    expires_at: Option<i64>,
    issued_at: Option<i64>,
) -> Result<String, ChatError> {
    sign(
        secret,
        &UserClaims {
            user_id: user_id.to_string(),
            exp: expires_at,
            iat: issued_at,
        },
    )
}

/// 服务端 token：REST 调用的 Authorization 头
pub fn server_token(secret: &str) -> Result<String, ChatError> {
    sign(secret, &ServerClaims { server: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    #[test]
    fn test_user_token_roundtrip_claims() {
        let now = chrono::Utc::now().timestamp();
        let token = user_token("s3cret", "alice", Some(now + 3600), Some(now)).unwrap();

        let data = jsonwebtoken::decode::<UserClaims>(
            &token,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(data.claims.user_id, "alice");
        assert_eq!(data.claims.exp, Some(now + 3600));
        assert_eq!(data.claims.iat, Some(now));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(server_token(""), Err(ChatError::Config(_))));
    }
}
