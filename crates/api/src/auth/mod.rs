//! Bearer token validation.
//!
//! Users are authenticated by an external identity provider; this service
//! only verifies the HS256 access tokens it issues.

pub mod jwt;
