//! Webhook configuration and delivery.

pub mod notify;
pub mod target;

pub use notify::{Delivery, Notifier};
