//! Who is acting and how their tokens are obtained.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod provider;
mod obo;
mod token_cache;
mod delegate;
mod request_context;

pub use principal::{Identity, UserContext};
pub use provider::{AccessToken, DevTokenProvider, TokenError, TokenProvider};
pub use obo::OnBehalfOfProvider;
pub use token_cache::TokenCache;
pub use delegate::SessionAuthDelegate;
pub use request_context::RequestContext;
