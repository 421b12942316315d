//! REST API client module for the studio backend.
//!
//! This module provides the `HttpClient` for talking to the backend and the
//! `SessionExpiryHook` it uses to announce rejected credentials.
//!
//! The backend uses bearer token authentication; the token is read from
//! persisted state on every request.

pub mod client;
pub mod error;
pub mod expiry;

pub use client::{AuthToken, ClientBuilder, HttpClient};
pub use error::ApiError;
pub use expiry::{ExpiryCallback, ExpirySubscription, SessionExpiryHook};
