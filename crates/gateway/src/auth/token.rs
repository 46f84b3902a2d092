use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// The cookie the web client stores its credential under. The gateway
/// reads it from the WebSocket upgrade request, never from an event
/// payload.
pub const JWT_COOKIE_NAME: &str = "jwt";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Verified identity carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid,
    pub issued_at: i64,
}

/// HS256 verifier for the credentials the auth service issues.
///
/// Token issuance policy lives with the auth service; `issue` exists
/// so other services and tests can mint compatible tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_at(user_id, current_unix_timestamp()?)
    }

    fn issue_at(&self, user_id: Uuid, issued_at: i64) -> anyhow::Result<String> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode credential token")
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode credential token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("token subject '{}' is not a UUID", claims.sub))?;

        Ok(Claims { user_id, issued_at: claims.iat })
    }
}

/// Extract the raw credential from a `Cookie` request header.
///
/// The handshake carries something like `theme=dark; jwt=eyJhbGci…`;
/// only the `jwt` cookie is the credential.
pub fn token_from_cookie_header(cookie_header: Option<&str>) -> Option<String> {
    cookie_header?
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("jwt="))
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
