//! Single signing interface (spec §9: "Multiple JWT libraries → single
//! signing interface"). The core depends only on `Signer`; `JwtSigner` is
//! the one concrete backend, using `jsonwebtoken`/HS256.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::FabricError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub slug: String,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
    pub capabilities: Vec<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

pub trait Signer: Send + Sync {
    fn sign(&self, claims: &Claims) -> Result<String, FabricError>;
    fn verify(&self, token: &str) -> Result<Claims, FabricError>;
}

pub struct JwtSigner {
    secret: SecretString,
}

impl JwtSigner {
    pub fn new(secret: String) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
        }
    }
}

impl Signer for JwtSigner {
    fn sign(&self, claims: &Claims) -> Result<String, FabricError> {
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let token = encode(&Header::new(Algorithm::HS256), claims, &key)?;
        Ok(token)
    }

    fn verify(&self, token: &str) -> Result<Claims, FabricError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        // We own expiry checking in `AuthService` (via the injectable clock),
        // so `jsonwebtoken` is only asked to check the signature here.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &key, &validation)?;
        Ok(data.claims)
    }
}
