mod schema;

pub use schema::Database;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Collection status for a finished book.
pub const STATUS_READ: &str = "read";

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Public display name, unique.
    pub username: String,
    /// Login email, unique.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Short biography.
    pub bio: Option<String>,
    /// Relative URL of the uploaded avatar.
    pub avatar_url: Option<String>,
    /// User role: "admin" or "user".
    pub role: String,
    /// Whether the email address was confirmed.
    pub is_verified: bool,
    /// Pending email verification token.
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// A ranked favorite book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    /// Row ID.
    pub id: i64,
    /// Owner.
    pub user_id: String,
    /// Catalog identifier of the book.
    pub book_id: String,
    /// 1-based rank.
    pub position: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// A book in a user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Row ID.
    pub id: i64,
    /// Owner.
    pub user_id: String,
    /// Catalog identifier of the book.
    pub book_id: String,
    /// Collection status (currently always "read").
    pub status: String,
    /// Date the book was finished.
    pub finish_date: Option<NaiveDate>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// A user's rating and comment for a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Review ID.
    pub id: i64,
    /// Author.
    pub user_id: String,
    /// Catalog identifier of the book.
    pub book_id: String,
    /// Rating between 0 and 5, half steps allowed.
    pub rating: f64,
    /// Optional review text.
    pub comment: Option<String>,
    /// Date the book was finished.
    pub finish_date: Option<NaiveDate>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Review joined with its author's public fields.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewWithAuthor {
    /// The review itself.
    #[serde(flatten)]
    pub review: Review,
    /// Author username.
    pub username: String,
    /// Author avatar.
    pub avatar_url: Option<String>,
}

/// Read book with the attached review, if any.
#[derive(Debug, Clone, Serialize)]
pub struct ReadBook {
    /// Collection entry.
    #[serde(flatten)]
    pub entry: CollectionEntry,
    /// Review for the same book by the same user.
    pub review: Option<Review>,
}

/// User listing row used by search and suggestions.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Email.
    pub email: String,
    /// Biography.
    pub bio: Option<String>,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Number of read books.
    pub read_books: i64,
    /// Number of favorite books.
    pub favorite_books: i64,
}

/// Public profile of a user.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Biography.
    pub bio: Option<String>,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Number of read books.
    pub read_books: i64,
    /// Number of favorite books.
    pub favorite_books: i64,
}

/// User row for the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct AdminUserRow {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Email.
    pub email: String,
    /// Role.
    pub role: String,
    /// Verified flag.
    pub is_verified: bool,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Number of reviews written.
    pub reviews: i64,
    /// Number of collection entries.
    pub collections: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
