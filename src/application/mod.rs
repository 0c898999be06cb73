//! Application services: REST-backed reads, optimistic comment writes and
//! the notification channel they report through.

pub mod ad_intensity;
pub mod comments;
pub mod error;
pub mod notifications;
pub mod sections;
