//! Favorite book ranking.
//!
//! Each user keeps at most [`MAX_FAVORITES`] favorite books. Their positions
//! always form the contiguous sequence `1..=N`. The planning functions here
//! are pure: they look at a user's current entries and compute the position
//! changes, which the database then applies inside a single transaction.

use crate::db::{Database, FavoriteEntry};
use crate::error::{AppError, Result};

/// Maximum number of favorite books per user.
pub const MAX_FAVORITES: usize = 4;

/// A new position assigned to an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reposition {
    /// Entry row ID.
    pub id: i64,
    /// Final position.
    pub position: i64,
}

/// Outcome of planning a move.
#[derive(Debug, Clone, PartialEq)]
pub enum MovePlan {
    /// Target already sits at the requested position.
    Unchanged(FavoriteEntry),
    /// Positions to rewrite; `target` carries its new position.
    Reorder {
        /// The moved entry after the move.
        target: FavoriteEntry,
        /// Every entry whose position changes, target included.
        changes: Vec<Reposition>,
    },
}

/// Check that `position` is a valid favorite slot.
pub fn validate_position(position: i64) -> Result<()> {
    if position < 1 || position > MAX_FAVORITES as i64 {
        return Err(AppError::InvalidPosition(position));
    }
    Ok(())
}

/// Compute the position of a newly added favorite.
pub fn plan_append(entries: &[FavoriteEntry], book_id: &str) -> Result<i64> {
    if entries.iter().any(|e| e.book_id == book_id) {
        return Err(AppError::DuplicateEntry(format!(
            "Book {} is already a favorite",
            book_id
        )));
    }

    if entries.len() >= MAX_FAVORITES {
        return Err(AppError::CapacityExceeded(MAX_FAVORITES));
    }

    Ok(entries.len() as i64 + 1)
}

/// Compute the reordering needed to move `book_id` to `new_position`.
///
/// Moving toward the end shifts the entries in `(old, new]` down by one;
/// moving toward the front shifts the entries in `[new, old)` up by one.
/// A position past the current count is rejected since it would leave a gap.
pub fn plan_move(entries: &[FavoriteEntry], book_id: &str, new_position: i64) -> Result<MovePlan> {
    let target = entries
        .iter()
        .find(|e| e.book_id == book_id)
        .ok_or_else(|| AppError::NotFound(format!("Favorite book not found: {}", book_id)))?;

    validate_position(new_position)?;
    if new_position > entries.len() as i64 {
        return Err(AppError::InvalidPosition(new_position));
    }

    let old = target.position;
    if new_position == old {
        return Ok(MovePlan::Unchanged(target.clone()));
    }

    let mut changes = Vec::new();
    for entry in entries {
        let position = if entry.id == target.id {
            new_position
        } else if new_position > old && entry.position > old && entry.position <= new_position {
            entry.position - 1
        } else if new_position < old && entry.position >= new_position && entry.position < old {
            entry.position + 1
        } else {
            continue;
        };

        changes.push(Reposition {
            id: entry.id,
            position,
        });
    }

    let mut moved = target.clone();
    moved.position = new_position;

    Ok(MovePlan::Reorder {
        target: moved,
        changes,
    })
}

/// Compute the shifts that close the gap left by removing `removed_position`.
pub fn plan_compaction(remaining: &[FavoriteEntry], removed_position: i64) -> Vec<Reposition> {
    remaining
        .iter()
        .filter(|e| e.position > removed_position)
        .map(|e| Reposition {
            id: e.id,
            position: e.position - 1,
        })
        .collect()
}

/// True if positions are exactly `1..=N` without duplicates.
pub fn is_contiguous(entries: &[FavoriteEntry]) -> bool {
    let mut positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p == i as i64 + 1)
}

/// Favorite ranking service.
#[derive(Clone)]
pub struct FavoriteService {
    db: Database,
}

impl FavoriteService {
    /// Create a new favorite service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// List a user's favorites by position.
    pub fn list(&self, user_id: &str) -> Result<Vec<FavoriteEntry>> {
        self.db.list_favorites(user_id)
    }

    /// Append a book at the end of the list.
    pub fn add(&self, user_id: &str, book_id: &str) -> Result<FavoriteEntry> {
        let book_id = book_id.trim();
        if book_id.is_empty() {
            return Err(AppError::InvalidInput("bookId is required".to_string()));
        }

        let entry = self.db.add_favorite(user_id, book_id)?;
        tracing::info!(user = %user_id, book = %book_id, position = entry.position, "Favorite added");
        Ok(entry)
    }

    /// Remove a book and compact the remaining positions.
    pub fn remove(&self, user_id: &str, book_id: &str) -> Result<FavoriteEntry> {
        let removed = self.db.remove_favorite(user_id, book_id)?;
        tracing::info!(user = %user_id, book = %book_id, position = removed.position, "Favorite removed");
        Ok(removed)
    }

    /// Move a book to a new position.
    pub fn move_to(&self, user_id: &str, book_id: &str, new_position: i64) -> Result<FavoriteEntry> {
        let entry = self.db.move_favorite(user_id, book_id, new_position)?;
        tracing::debug!(user = %user_id, book = %book_id, position = entry.position, "Favorite moved");
        Ok(entry)
    }
}
