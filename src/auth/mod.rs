//! Credentials and the OAuth2 lifecycle that keeps them valid.

pub mod callback;

pub(crate) mod credentials;
pub use credentials::{CredentialState, SharedCredentials};

pub(crate) mod flow;
pub use flow::{AuthorizationError, AuthorizationFlow, AuthorizationStatus, UrlDelivery};

pub(crate) mod oauth;
pub use oauth::{source_chain, DexcomOAuth, OAuthConfig, OAuthError, TokenRequestError};

pub(crate) mod store;
pub use store::{CredentialPair, CredentialStore, StoreError};
