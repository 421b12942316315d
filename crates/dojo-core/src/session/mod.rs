//! Session lifecycle: who is signed in, and what happens when that changes.
//!
//! This module provides:
//! - `SessionCoordinator`: hydrates the session from storage, performs
//!   login/logout, and reacts to expired sessions reported by the client
//! - `SessionSync`: keeps a coordinator in step with other storage contexts
//!
//! The session is persisted as two entries: the raw bearer token under
//! `"authToken"` and the JSON user profile under `"user"`.

pub mod coordinator;

pub use coordinator::{
    SessionCoordinator, SessionSnapshot, SessionStatus, SessionSync, SESSION_EXPIRED_MESSAGE,
};
