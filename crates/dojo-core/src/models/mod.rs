//! Wire and persisted data models.
//!
//! - `UserProfile`: the signed-in account, persisted under the `"user"` key
//! - `Credentials`, `LoginResponse`: the login exchange

pub mod auth;

pub use auth::{Credentials, LoginResponse, UserProfile};
