//! Kundura Admin - Back-office controllers.
//!
//! Everything here runs on behalf of a signed-in admin. Each controller is
//! built from an [`AdminContext`], which is only handed out after the role
//! check passes, so no admin operation can run for a customer or a visitor.
//!
//! # Modules
//!
//! - [`products`], [`brands`], [`sliders`] - Catalog and homepage editing
//! - [`uploads`] - Image uploads to object storage
//! - [`users`] - Role management
//! - [`reviews`] - Review moderation
//! - [`settings`] - Site settings with a read cache
//! - [`broadcast`] - Sending and retracting notifications
//! - [`dashboard`] - Landing page counts
//!
//! Every mutation reports its outcome through the session's toast channel
//! and refetches the affected list afterwards.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod brands;
pub mod broadcast;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod forms;
pub mod products;
pub mod reviews;
pub mod settings;
pub mod sliders;
pub mod uploads;
pub mod users;

#[cfg(test)]
mod test_support;

pub use context::AdminContext;
pub use error::AdminError;
