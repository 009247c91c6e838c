//! OpenID Connect collaborator: the trait the session layer consumes and a
//! discovery-based client implementing it.

mod client;
mod config;
mod errors;
mod provider;
mod types;

pub use client::OidcClient;
pub use config::OidcConfig;
pub use errors::OidcError;
pub use provider::OidcProvider;
pub use types::{OidcDiscoveryDocument, TokenSet, VerifiedIdentity};
