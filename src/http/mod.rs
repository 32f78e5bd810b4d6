//! HTTP front end.
//!
//! `/api/...` is the bearer-protected management API; every other path is
//! handed to `git http-backend` so stock git clients can clone and push.

pub mod auth;
pub mod cgi;
pub mod handler;
