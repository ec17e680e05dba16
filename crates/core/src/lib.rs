//! Kundura Core - Shared domain types.
//!
//! This crate provides the types every other Kundura crate speaks:
//! - `storefront` - Backend client, sync engine and customer-facing controllers
//! - `admin` - Back-office controllers
//! - `cli` - Operator command-line tools
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no network clients, no
//! async runtime. Validation happens at construction so a value of one of
//! these types is always well-formed.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, emails, passwords, prices, quantities, session
//!   ids and status enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
