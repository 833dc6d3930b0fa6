//! Handler modules for the federated node fabric.
//!
//! - `ai_engine` — the inbound `/api/ai-engine/*` surface (spec §6): what
//!   this node answers when it is itself queried as a peer.
//! - `nodes` — registry administration: register/list/inspect/unregister.
//! - `ops` — the fabric's own outward-facing operations: route a query,
//!   run a federated search, forward a chat/action/aggregate call.
//! - `health` — ambient health/readiness/metrics endpoints.

pub mod ai_engine;
pub mod health;
pub mod nodes;
pub mod ops;

pub use ai_engine::*;
pub use health::*;
pub use nodes::*;
pub use ops::*;
