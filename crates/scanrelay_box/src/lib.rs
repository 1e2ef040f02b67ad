//! Box client for scanrelay
//!
//! Provides:
//! - **Settings**: parsing of the service-account settings file
//! - **Auth**: JWT bearer or client-credentials token grants
//! - **Client**: token management, folder listing, uploads and collaborations

pub mod auth;
pub mod client;
pub mod error;
pub mod settings;

pub use auth::TokenGrant;
pub use client::{BoxClient, BoxEndpoints, Collaboration, CurrentUser, Item};
pub use error::{BoxError, Result};
pub use settings::{AppAuth, BoxSettings};
