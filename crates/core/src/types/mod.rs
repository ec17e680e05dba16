//! Core types for Kundura.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod credential;
pub mod email;
pub mod id;
pub mod price;
pub mod quantity;
pub mod session;
pub mod status;

pub use credential::{Password, PasswordError};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use quantity::{Quantity, QuantityError};
pub use session::{SessionId, SessionIdError};
pub use status::*;
