use crate::db::*;
use crate::error::{AppError, Result};
use crate::favorites::{self, MovePlan, Reposition};
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, username, email, password_hash, bio, avatar_url, role, is_verified,
                            verification_token, created_at, last_login";

const REVIEW_COLUMNS: &str =
    "r.id, r.user_id, r.book_id, r.rating, r.comment, r.finish_date, r.created_at, r.updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Map a failed insert to `DuplicateEntry` when a unique index rejected it.
fn insert_error(e: rusqlite::Error, duplicate: impl FnOnce() -> String, what: &str) -> AppError {
    if e.to_string().contains("UNIQUE constraint") {
        AppError::DuplicateEntry(duplicate())
    } else {
        AppError::Internal(format!("Failed to {}: {}", what, e))
    }
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                bio TEXT,
                avatar_url TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                is_verified INTEGER NOT NULL DEFAULT 0,
                verification_token TEXT,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Ranked favorites, at most four per user
            CREATE TABLE IF NOT EXISTS favorite_books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, book_id),
                UNIQUE (user_id, position),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Collection of read books
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'read',
                finish_date TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, book_id, status),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Reviews, one per user and book
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                rating REAL NOT NULL,
                comment TEXT,
                finish_date TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_reviews_book ON reviews(book_id);
            CREATE INDEX IF NOT EXISTS idx_users_verification ON users(verification_token);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // ========== USER OPERATIONS ==========

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            bio: row.get(4)?,
            avatar_url: row.get(5)?,
            role: row.get(6)?,
            is_verified: row.get(7)?,
            verification_token: row.get(8)?,
            created_at: row.get(9)?,
            last_login: row.get(10)?,
        })
    }

    fn query_user(&self, filter: &str, value: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, filter),
            params![value],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, bio, avatar_url, role,
                                is_verified, verification_token, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.bio,
                user.avatar_url,
                user.role,
                user.is_verified,
                user.verification_token,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            insert_error(
                e,
                || format!("Username or email already in use: {}", user.username),
                "create user",
            )
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.query_user("username", username)
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user("email", email)
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.query_user("id", id)
    }

    /// Get user holding a pending verification token.
    pub fn get_user_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        self.query_user("verification_token", token)
    }

    /// Mark user email as verified and clear the token.
    pub fn mark_user_verified(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET is_verified = 1, verification_token = NULL WHERE id = ?1",
            params![user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to verify user: {}", e)))?;
        Ok(())
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY username",
                USER_COLUMNS
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user role.
    pub fn update_user_role(&self, username: &str, role: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET role = ?1 WHERE username = ?2",
                params![role, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update role: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Update username and bio. `None` keeps the current value.
    pub fn update_profile(
        &self,
        user_id: &str,
        username: Option<&str>,
        bio: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET username = COALESCE(?1, username), bio = COALESCE(?2, bio)
                 WHERE id = ?3",
                params![username, bio, user_id],
            )
            .map_err(|e| {
                insert_error(
                    e,
                    || format!("Username already in use: {}", username.unwrap_or_default()),
                    "update profile",
                )
            })?;
        Ok(rows > 0)
    }

    /// Set the avatar URL, returning the previous one.
    pub fn replace_avatar(&self, user_id: &str, avatar_url: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let previous: Option<Option<String>> = tx
            .query_row(
                "SELECT avatar_url FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let previous =
            previous.ok_or_else(|| AppError::NotFound(format!("User not found: {}", user_id)))?;

        tx.execute(
            "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
            params![avatar_url, user_id],
        )?;
        tx.commit()?;

        Ok(previous)
    }

    /// Delete user by ID. Sessions, favorites, collection and reviews cascade.
    pub fn delete_user_by_id(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    /// Public profile with activity counts.
    pub fn get_public_profile(&self, id: &str) -> Result<Option<PublicProfile>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT u.id, u.username, u.bio, u.avatar_url, u.created_at,
                    (SELECT COUNT(*) FROM collections c WHERE c.user_id = u.id),
                    (SELECT COUNT(*) FROM favorite_books f WHERE f.user_id = u.id)
             FROM users u WHERE u.id = ?1",
            params![id],
            |row| {
                Ok(PublicProfile {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    bio: row.get(2)?,
                    avatar_url: row.get(3)?,
                    created_at: row.get(4)?,
                    read_books: row.get(5)?,
                    favorite_books: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get profile: {}", e)))
    }

    fn row_to_user_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
        Ok(UserSummary {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            bio: row.get(3)?,
            avatar_url: row.get(4)?,
            read_books: row.get(5)?,
            favorite_books: row.get(6)?,
        })
    }

    /// Search users by username or email substring, excluding `exclude_id`.
    pub fn search_users(&self, query: &str, exclude_id: &str, limit: usize) -> Result<Vec<UserSummary>> {
        let conn = self.conn.lock();
        let pattern = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.username, u.email, u.bio, u.avatar_url,
                        (SELECT COUNT(*) FROM collections c WHERE c.user_id = u.id),
                        (SELECT COUNT(*) FROM favorite_books f WHERE f.user_id = u.id)
                 FROM users u
                 WHERE (u.username LIKE ?1 ESCAPE '\\' OR u.email LIKE ?1 ESCAPE '\\')
                   AND u.id != ?2
                 ORDER BY u.username
                 LIMIT ?3",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map(
                params![pattern, exclude_id, limit as i64],
                Self::row_to_user_summary,
            )
            .map_err(|e| AppError::Internal(format!("Failed to search users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Most active readers, excluding `exclude_id`.
    pub fn suggested_users(&self, exclude_id: &str, limit: usize) -> Result<Vec<UserSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.username, u.email, u.bio, u.avatar_url,
                        (SELECT COUNT(*) FROM collections c WHERE c.user_id = u.id) AS read_books,
                        (SELECT COUNT(*) FROM favorite_books f WHERE f.user_id = u.id)
                 FROM users u
                 WHERE u.id != ?1
                 ORDER BY read_books DESC, u.username
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map(params![exclude_id, limit as i64], Self::row_to_user_summary)
            .map_err(|e| AppError::Internal(format!("Failed to get suggestions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Users with review and collection counts.
    pub fn admin_list_users(&self) -> Result<Vec<AdminUserRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.username, u.email, u.role, u.is_verified, u.created_at,
                        (SELECT COUNT(*) FROM reviews r WHERE r.user_id = u.id),
                        (SELECT COUNT(*) FROM collections c WHERE c.user_id = u.id)
                 FROM users u ORDER BY u.created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], |row| {
                Ok(AdminUserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    role: row.get(3)?,
                    is_verified: row.get(4)?,
                    created_at: row.get(5)?,
                    reviews: row.get(6)?,
                    collections: row.get(7)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== FAVORITE OPERATIONS ==========

    fn row_to_favorite(row: &rusqlite::Row<'_>) -> rusqlite::Result<FavoriteEntry> {
        Ok(FavoriteEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            position: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn favorites_in(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<FavoriteEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, book_id, position, created_at
             FROM favorite_books WHERE user_id = ?1
             ORDER BY position",
        )?;
        let entries = stmt
            .query_map(params![user_id], Self::row_to_favorite)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Rewrite positions in two phases so the `(user_id, position)` index
    /// never sees two rows on the same slot.
    fn apply_repositions(tx: &Transaction<'_>, changes: &[Reposition]) -> rusqlite::Result<()> {
        let mut stmt = tx.prepare("UPDATE favorite_books SET position = ?1 WHERE id = ?2")?;
        for change in changes {
            stmt.execute(params![-change.position, change.id])?;
        }
        for change in changes {
            stmt.execute(params![change.position, change.id])?;
        }
        Ok(())
    }

    /// List a user's favorites ordered by position.
    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteEntry>> {
        let conn = self.conn.lock();
        Self::favorites_in(&conn, user_id)
            .map_err(|e| AppError::Internal(format!("Failed to list favorites: {}", e)))
    }

    /// Append a favorite at the end of the user's list.
    pub fn add_favorite(&self, user_id: &str, book_id: &str) -> Result<FavoriteEntry> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let entries = Self::favorites_in(&tx, user_id)?;
        let position = favorites::plan_append(&entries, book_id)?;
        let created_at = now_timestamp();

        tx.execute(
            "INSERT INTO favorite_books (user_id, book_id, position, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, book_id, position, created_at],
        )
        .map_err(|e| {
            insert_error(
                e,
                || format!("Book {} is already a favorite", book_id),
                "add favorite",
            )
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(FavoriteEntry {
            id,
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            position,
            created_at,
        })
    }

    /// Remove a favorite and close the gap it leaves.
    pub fn remove_favorite(&self, user_id: &str, book_id: &str) -> Result<FavoriteEntry> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let entries = Self::favorites_in(&tx, user_id)?;
        let (removed, remaining): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.book_id == book_id);
        let removed = removed
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Favorite book not found: {}", book_id)))?;

        tx.execute(
            "DELETE FROM favorite_books WHERE id = ?1",
            params![removed.id],
        )?;

        let changes = favorites::plan_compaction(&remaining, removed.position);
        Self::apply_repositions(&tx, &changes)?;
        tx.commit()?;

        Ok(removed)
    }

    /// Move a favorite to `new_position`, shifting the entries in between.
    pub fn move_favorite(
        &self,
        user_id: &str,
        book_id: &str,
        new_position: i64,
    ) -> Result<FavoriteEntry> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let entries = Self::favorites_in(&tx, user_id)?;

        match favorites::plan_move(&entries, book_id, new_position)? {
            MovePlan::Unchanged(entry) => Ok(entry),
            MovePlan::Reorder { target, changes } => {
                Self::apply_repositions(&tx, &changes)?;
                tx.commit()?;
                Ok(target)
            }
        }
    }

    /// Count a user's favorites.
    pub fn count_favorites(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM favorite_books WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count favorites: {}", e)))
    }

    // ========== COLLECTION OPERATIONS ==========

    fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionEntry> {
        Ok(CollectionEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            status: row.get(3)?,
            finish_date: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Add a book to a user's collection.
    pub fn add_collection_entry(
        &self,
        user_id: &str,
        book_id: &str,
        status: &str,
        finish_date: Option<NaiveDate>,
    ) -> Result<CollectionEntry> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM collections
                           WHERE user_id = ?1 AND book_id = ?2 AND status = ?3)",
            params![user_id, book_id, status],
            |row| row.get(0),
        )?;
        if exists {
            return Err(AppError::DuplicateEntry(format!(
                "Book {} is already in the collection",
                book_id
            )));
        }

        let created_at = now_timestamp();
        tx.execute(
            "INSERT INTO collections (user_id, book_id, status, finish_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, book_id, status, finish_date, created_at],
        )
        .map_err(|e| {
            insert_error(
                e,
                || format!("Book {} is already in the collection", book_id),
                "add collection entry",
            )
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(CollectionEntry {
            id,
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            status: status.to_string(),
            finish_date,
            created_at,
        })
    }

    /// Remove a book from the collection together with its review.
    ///
    /// Returns the number of reviews deleted alongside the entry.
    pub fn remove_collection_entry(&self, user_id: &str, book_id: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let entries: i64 = tx.query_row(
            "SELECT COUNT(*) FROM collections WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
            |row| row.get(0),
        )?;
        if entries == 0 {
            return Err(AppError::NotFound(format!(
                "Book not found in collection: {}",
                book_id
            )));
        }

        let reviews = tx.execute(
            "DELETE FROM reviews WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        tx.execute(
            "DELETE FROM collections WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        tx.commit()?;

        Ok(reviews)
    }

    /// Get a collection entry.
    pub fn get_collection_entry(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> Result<Option<CollectionEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, book_id, status, finish_date, created_at
             FROM collections WHERE user_id = ?1 AND book_id = ?2
             ORDER BY id LIMIT 1",
            params![user_id, book_id],
            Self::row_to_collection,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get collection entry: {}", e)))
    }

    /// List a user's read books, latest finish date first, with their reviews.
    pub fn list_read_books(&self, user_id: &str) -> Result<Vec<ReadBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT c.id, c.user_id, c.book_id, c.status, c.finish_date, c.created_at,
                        {}
                 FROM collections c
                 LEFT JOIN reviews r ON r.user_id = c.user_id AND r.book_id = c.book_id
                 WHERE c.user_id = ?1 AND c.status = ?2
                 ORDER BY c.finish_date IS NULL, c.finish_date DESC, c.id DESC",
                REVIEW_COLUMNS
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params![user_id, STATUS_READ], |row| {
                let entry = Self::row_to_collection(row)?;
                let review_id: Option<i64> = row.get(6)?;
                let review = match review_id {
                    Some(id) => Some(Review {
                        id,
                        user_id: row.get(7)?,
                        book_id: row.get(8)?,
                        rating: row.get(9)?,
                        comment: row.get(10)?,
                        finish_date: row.get(11)?,
                        created_at: row.get(12)?,
                        updated_at: row.get(13)?,
                    }),
                    None => None,
                };
                Ok(ReadBook { entry, review })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list read books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect read books: {}", e)))?;

        Ok(books)
    }

    /// Collection history of a user, newest first.
    pub fn list_collection(&self, user_id: &str) -> Result<Vec<CollectionEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, book_id, status, finish_date, created_at
                 FROM collections WHERE user_id = ?1
                 ORDER BY id DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params![user_id], Self::row_to_collection)
            .map_err(|e| AppError::Internal(format!("Failed to list collection: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect collection: {}", e)))?;

        Ok(entries)
    }

    /// Count a user's collection entries.
    pub fn count_collection(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM collections WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count collection: {}", e)))
    }

    // ========== REVIEW OPERATIONS ==========

    fn row_to_review(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
        Ok(Review {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            rating: row.get(3)?,
            comment: row.get(4)?,
            finish_date: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn row_to_review_with_author(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewWithAuthor> {
        Ok(ReviewWithAuthor {
            review: Self::row_to_review(row)?,
            username: row.get(8)?,
            avatar_url: row.get(9)?,
        })
    }

    /// Insert a review; one per user and book.
    pub fn create_review(
        &self,
        user_id: &str,
        book_id: &str,
        rating: f64,
        comment: Option<&str>,
        finish_date: Option<NaiveDate>,
    ) -> Result<Review> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM reviews WHERE user_id = ?1 AND book_id = ?2)",
            params![user_id, book_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(AppError::DuplicateEntry(format!(
                "A review already exists for book {}",
                book_id
            )));
        }

        let now = now_timestamp();
        tx.execute(
            "INSERT INTO reviews (user_id, book_id, rating, comment, finish_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![user_id, book_id, rating, comment, finish_date, now],
        )
        .map_err(|e| {
            insert_error(
                e,
                || format!("A review already exists for book {}", book_id),
                "create review",
            )
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Review {
            id,
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            rating,
            comment: comment.map(str::to_string),
            finish_date,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get review by ID.
    pub fn get_review(&self, id: i64) -> Result<Option<Review>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM reviews r WHERE r.id = ?1", REVIEW_COLUMNS),
            params![id],
            Self::row_to_review,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get review: {}", e)))
    }

    /// Get a user's review for a book.
    pub fn get_user_book_review(&self, user_id: &str, book_id: &str) -> Result<Option<Review>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM reviews r WHERE r.user_id = ?1 AND r.book_id = ?2",
                REVIEW_COLUMNS
            ),
            params![user_id, book_id],
            Self::row_to_review,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get review: {}", e)))
    }

    /// Overwrite rating, comment and finish date of a review.
    pub fn update_review(
        &self,
        id: i64,
        rating: f64,
        comment: Option<&str>,
        finish_date: Option<NaiveDate>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE reviews SET rating = ?1, comment = ?2, finish_date = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![rating, comment, finish_date, now_timestamp(), id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update review: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete review by ID.
    pub fn delete_review(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM reviews WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete review: {}", e)))?;
        Ok(rows > 0)
    }

    fn list_reviews_where(&self, filter: &str, value: Option<&str>, order: &str) -> Result<Vec<ReviewWithAuthor>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {}, u.username, u.avatar_url
                 FROM reviews r JOIN users u ON u.id = r.user_id
                 WHERE {}
                 ORDER BY {}",
                REVIEW_COLUMNS, filter, order
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let rows = match value {
            Some(v) => stmt.query_map(params![v], Self::row_to_review_with_author),
            None => stmt.query_map([], Self::row_to_review_with_author),
        };

        let reviews = rows
            .map_err(|e| AppError::Internal(format!("Failed to list reviews: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect reviews: {}", e)))?;

        Ok(reviews)
    }

    /// All reviews for a book, latest finish date first.
    pub fn list_book_reviews(&self, book_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.list_reviews_where(
            "r.book_id = ?1",
            Some(book_id),
            "r.finish_date IS NULL, r.finish_date DESC, r.id DESC",
        )
    }

    /// All reviews written by a user, latest finish date first.
    pub fn list_user_reviews(&self, user_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.list_reviews_where(
            "r.user_id = ?1",
            Some(user_id),
            "r.finish_date IS NULL, r.finish_date DESC, r.id DESC",
        )
    }

    /// Review history of a user, newest first.
    pub fn list_user_review_history(&self, user_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.list_reviews_where("r.user_id = ?1", Some(user_id), "r.id DESC")
    }

    /// Every review, newest first (moderation).
    pub fn list_all_reviews(&self) -> Result<Vec<ReviewWithAuthor>> {
        self.list_reviews_where("1 = 1", None, "r.created_at DESC, r.id DESC")
    }

    /// Number of reviews and their average rating for a user.
    pub fn review_totals(&self, user_id: &str) -> Result<(i64, Option<f64>)> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*), AVG(rating) FROM reviews WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| AppError::Internal(format!("Failed to compute review totals: {}", e)))
    }
}
