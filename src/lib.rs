//! mybook: a social reading tracker.
//!
//! Readers keep a collection of the books they finished, rate and review
//! them, rank up to four favorite books and discover other readers. Book
//! metadata comes from a Google Books compatible catalog.
//!
//! # Features
//!
//! - Accounts with email verification and bearer sessions
//! - Read-book collection with cascading review removal
//! - One review per user and book, editable only by its author
//! - Ranked favorites with contiguous positions
//! - Reading statistics and yearly goal
//! - User search, suggestions and avatars
//! - Admin moderation of users and reviews

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Book catalog client.
pub mod catalog;
/// Read-book collection.
pub mod collection;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Favorite book ranking.
pub mod favorites;
/// Account mail.
pub mod mail;
/// Book reviews.
pub mod reviews;
/// HTTP server.
pub mod server;
/// Reading statistics.
pub mod stats;
/// User profiles and discovery.
pub mod users;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
