//! Kundura storefront library.
//!
//! Customer-facing state for the Kundura shoe shop. Persistence, auth, file
//! storage and realtime push all live on a hosted backend platform; this
//! crate is the layer between that platform and a UI:
//!
//! - [`backend`] - the platform's capabilities as traits, with a REST +
//!   websocket client and an in-memory stand-in
//! - [`session`] - who is signed in, passed explicitly to every controller
//! - [`sync`] - the fetch-then-follow engine behind every live list
//! - [`cart`], [`favorites`], [`notifications`], [`views`] - the live
//!   controllers
//! - [`catalog`] - one-shot catalog and profile reads
//! - [`routes`] - client-side page routes
//!
//! Controllers report outcomes as [`toast::Toast`]s and never panic on
//! remote failures; see [`error::AppError`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod session;
pub mod sync;
pub mod toast;
pub mod views;

use std::sync::Arc;

pub use error::AppError;
pub use session::SessionContext;

use backend::{Backend, RestBackend};
use config::BackendConfig;
use toast::Toaster;

/// Connect to the hosted platform described by `config` and start a session.
///
/// # Errors
///
/// Returns [`AppError::Backend`] if the HTTP client cannot be built or the
/// current user cannot be read.
pub async fn connect(config: &BackendConfig, toaster: Arc<dyn Toaster>) -> error::Result<SessionContext> {
    let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(config)?);
    SessionContext::start(backend, toaster).await
}
