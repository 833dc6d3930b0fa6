//! Auth Service (C2) — short-lived bearer tokens for inter-node calls.
//!
//! Signing is abstracted behind a `Signer` (spec §9: "Multiple JWT
//! libraries → single signing interface") so the rest of the core never
//! branches on which JWT crate backs it; `JwtSigner` is the one concrete
//! implementation, using `jsonwebtoken`. Time is abstracted behind `Clock`
//! (grounded on `caliber-api/src/auth.rs`'s `JwtClock`) so expiry tests are
//! deterministic instead of racing real wall-clock time.

mod clock;
mod signer;

pub use clock::{Clock, FixedClock, SystemClock};
pub use signer::{Claims, JwtSigner, Signer};

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::FabricError;
use crate::registry::{Node, NodeStore};

/// Plaintext refresh token returned once to the caller; only its hash is
/// ever persisted on the node record.
pub struct IssuedRefreshToken {
    pub plaintext: String,
    pub hash: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub struct AuthService {
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let signer: Arc<dyn Signer> = Arc::new(JwtSigner::new(config.jwt_secret.clone()));
        Self {
            signer,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Construct with injected signer/clock — used by tests that need
    /// deterministic time or a fake signer.
    pub fn with_parts(config: AuthConfig, signer: Arc<dyn Signer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            signer,
            clock,
            config,
        }
    }

    /// Issue an access token for `node`, embedding its capabilities
    /// verbatim. Fails with `AuthFailure` ("no signer configured") if the
    /// shared secret is empty.
    pub fn generate_token(&self, node: &Node, ttl_secs: Option<u64>) -> Result<String, FabricError> {
        if self.config.jwt_secret.is_empty() {
            return Err(FabricError::AuthFailure("no signer configured".into()));
        }
        let now = self.clock.now_epoch_secs();
        let ttl = ttl_secs.unwrap_or(self.config.jwt_ttl_secs) as i64;
        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: node.id.to_string(),
            slug: node.slug.clone(),
            name: node.name.clone(),
            iat: now,
            exp: now + ttl,
            capabilities: node.capabilities.iter().cloned().collect(),
            node_type: node.node_type.as_str().to_string(),
            aud: self.config.audience.clone(),
        };
        self.signer.sign(&claims)
    }

    /// Validate an access token. Never throws across this boundary: any
    /// failure (expired, malformed, bad signature) yields `None`.
    pub fn validate_token(&self, token: &str) -> Option<Claims> {
        let claims = self.signer.verify(token).ok()?;
        if claims.exp <= self.clock.now_epoch_secs() {
            return None;
        }
        Some(claims)
    }

    /// True iff `node`'s advertised capabilities contain `cap`.
    pub fn verify_capability(node: &Node, cap: &str) -> bool {
        node.capabilities.contains(cap)
    }

    /// Generate a new refresh token for `node`. Returns the plaintext once;
    /// the caller (Registry) is responsible for persisting only the hash.
    pub fn generate_refresh_token(&self, ttl_secs: Option<u64>) -> IssuedRefreshToken {
        let ttl = ttl_secs.unwrap_or(self.config.refresh_ttl_secs);
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let plaintext = hex::encode(raw);
        let hash = hash_refresh_token(&plaintext);
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl as i64);
        IssuedRefreshToken {
            plaintext,
            hash,
            expires_at,
        }
    }

    /// Exchange a plaintext refresh token for a fresh access token. Validates
    /// by hash equality plus `refresh_token_expires_at > now && status=active`.
    pub async fn refresh_access_token(
        &self,
        store: &dyn NodeStore,
        plaintext: &str,
    ) -> Result<Option<(String, Node)>, FabricError> {
        let hash = hash_refresh_token(plaintext);
        let nodes = store.load_all().await?;
        let now = chrono::Utc::now();
        let Some(node) = nodes.into_iter().find(|n| {
            n.refresh_token_hash.as_deref() == Some(hash.as_str())
                && n.refresh_token_expires_at.is_some_and(|exp| exp > now)
                && n.status == crate::registry::NodeStatus::Active
        }) else {
            return Ok(None);
        };
        let access = self.generate_token(&node, None)?;
        Ok(Some((access, node)))
    }

    /// Clear `node`'s refresh-token hash and expiry (spec §4.2
    /// `revokeRefreshToken`). The caller (Registry) persists the result via
    /// `NodeStore::upsert`.
    pub fn revoke_refresh_token(&self, node: &Node) -> Node {
        let mut updated = node.clone();
        updated.refresh_token_hash = None;
        updated.refresh_token_expires_at = None;
        updated
    }
}

fn hash_refresh_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Middleware gating the inbound `/api/ai-engine/*` surface: requires a
/// valid `X-Node-Token` bearer, verified against `AppState::auth`. Mirrors
/// the backend's `request_id_middleware` shape — a plain `axum::middleware`
/// function taking `State<AppState>`.
pub async fn require_node_token(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    let token = req
        .headers()
        .get("x-node-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let Some(token) = token else {
        return FabricError::AuthFailure("missing X-Node-Token".into()).into_response();
    };
    if state.auth.validate_token(&token).is_none() {
        return FabricError::AuthFailure("invalid or expired X-Node-Token".into()).into_response();
    }
    next.run(req).await
}

/// Capabilities advertised by a node as an ordered, deduplicated set —
/// used wherever a stable iteration order matters (token claims, digests).
pub fn ordered(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
