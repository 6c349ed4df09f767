//! OAuth 2.0 endpoints
//!
//! Implements:
//! - RFC 6749 Section 4.1: Authorization Code grant
//! - RFC 8414: OAuth 2.0 Authorization Server Metadata

pub mod authorize;
pub mod metadata;
pub mod token;
