//! Federation state machine for web-browser SSO.
//!
//! This crate layers the provider-side behavior on top of
//! `fedlink-protocol-saml`:
//!
//! - **Handler chain** - a fixed pipeline of handlers processing every
//!   exchange, with exactly one handler per traversal producing the
//!   resulting document
//! - **Service provider** - session establishment from assertions, expired
//!   assertion re-issue and logout initiation
//! - **Identity provider** - assertion issuance through a security token
//!   service, role generation and multi-participant single logout
//! - **Trust** - issuer domain checks and key management for signature
//!   validation across providers
//!
//! The crate is framework-neutral: hosts map their HTTP layer onto
//! [`http::HttpContext`] and render [`sp::SpOutcome`] or
//! [`idp::IdpOutcome`] back.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod identity_server;
pub mod idp;
pub mod keys;
pub mod roles;
pub mod session;
pub mod sp;
pub mod sts;

pub use config::{IdpConfig, KeyManagerConfig, KeyManagerKind, SpConfig};
pub use error::{FederationError, FederationResult};
pub use http::{HttpContext, HttpMethod};
pub use identity_server::IdentityServer;
pub use idp::{IdentityProvider, IdpOutcome};
pub use keys::{build_key_manager, InMemoryKeyManager, TrustKeyManager};
pub use roles::{RoleGenerator, RoleGeneratorRegistry, StaticRoleGenerator};
pub use session::{InMemorySessionStore, Principal, Session, SessionStore};
pub use sp::{ServiceProvider, SpOutcome};
pub use sts::SecurityTokenService;
