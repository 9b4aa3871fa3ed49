//! Read-book collection.

use crate::db::{CollectionEntry, Database, ReadBook, STATUS_READ};
use crate::error::{AppError, Result};
use chrono::NaiveDate;

/// Collection service.
#[derive(Clone)]
pub struct CollectionService {
    db: Database,
}

impl CollectionService {
    /// Create a new collection service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add a book to the user's collection.
    pub fn add(
        &self,
        user_id: &str,
        book_id: &str,
        status: &str,
        finish_date: Option<NaiveDate>,
    ) -> Result<CollectionEntry> {
        let book_id = book_id.trim();
        if book_id.is_empty() {
            return Err(AppError::InvalidInput("bookId is required".to_string()));
        }
        if status != STATUS_READ {
            return Err(AppError::InvalidInput(format!(
                "Unsupported collection status: {}",
                status
            )));
        }

        let entry = self
            .db
            .add_collection_entry(user_id, book_id, status, finish_date)?;
        tracing::info!(user = %user_id, book = %book_id, "Book added to collection");
        Ok(entry)
    }

    /// Remove a book from the collection; its review goes with it.
    pub fn remove(&self, user_id: &str, book_id: &str) -> Result<()> {
        let reviews = self.db.remove_collection_entry(user_id, book_id)?;
        tracing::info!(
            user = %user_id,
            book = %book_id,
            reviews_deleted = reviews,
            "Book removed from collection"
        );
        Ok(())
    }

    /// Read books with their reviews.
    pub fn read_books(&self, user_id: &str) -> Result<Vec<ReadBook>> {
        self.db.list_read_books(user_id)
    }

    /// Full collection history, newest first.
    pub fn history(&self, user_id: &str) -> Result<Vec<CollectionEntry>> {
        self.db.list_collection(user_id)
    }
}
