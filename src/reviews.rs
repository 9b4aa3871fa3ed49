//! Book reviews.

use crate::db::{Database, Review, ReviewWithAuthor};
use crate::error::{AppError, Result};
use chrono::NaiveDate;

/// Highest accepted rating.
pub const MAX_RATING: f64 = 5.0;

/// Fields written when creating or editing a review.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    /// Rating in `[0, 5]`.
    pub rating: f64,
    /// Optional text; blank comments are stored as `None`.
    pub comment: Option<String>,
    /// Date the book was finished.
    pub finish_date: Option<NaiveDate>,
}

impl ReviewDraft {
    fn validate(&self) -> Result<()> {
        if !self.rating.is_finite() || self.rating < 0.0 || self.rating > MAX_RATING {
            return Err(AppError::InvalidInput(format!(
                "Rating must be between 0 and {}",
                MAX_RATING
            )));
        }
        Ok(())
    }

    fn comment(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Review service.
#[derive(Clone)]
pub struct ReviewService {
    db: Database,
}

impl ReviewService {
    /// Create a new review service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a review; a user reviews a given book at most once.
    pub fn create(&self, user_id: &str, book_id: &str, draft: &ReviewDraft) -> Result<Review> {
        let book_id = book_id.trim();
        if book_id.is_empty() {
            return Err(AppError::InvalidInput("bookId is required".to_string()));
        }
        draft.validate()?;

        let review = self.db.create_review(
            user_id,
            book_id,
            draft.rating,
            draft.comment(),
            draft.finish_date,
        )?;
        tracing::info!(user = %user_id, book = %book_id, review = review.id, "Review created");
        Ok(review)
    }

    /// Load a review and check that `actor_id` wrote it.
    fn authored(&self, actor_id: &str, review_id: i64) -> Result<Review> {
        let review = self
            .db
            .get_review(review_id)?
            .ok_or_else(|| AppError::NotFound(format!("Review not found: {}", review_id)))?;

        if review.user_id != actor_id {
            return Err(AppError::Forbidden(
                "Only the author can change this review".to_string(),
            ));
        }
        Ok(review)
    }

    /// Edit a review written by `actor_id`.
    pub fn update(&self, actor_id: &str, review_id: i64, draft: &ReviewDraft) -> Result<Review> {
        self.authored(actor_id, review_id)?;
        draft.validate()?;

        self.db
            .update_review(review_id, draft.rating, draft.comment(), draft.finish_date)?;

        self.db
            .get_review(review_id)?
            .ok_or_else(|| AppError::NotFound(format!("Review not found: {}", review_id)))
    }

    /// Delete a review written by `actor_id`.
    pub fn delete(&self, actor_id: &str, review_id: i64) -> Result<()> {
        self.authored(actor_id, review_id)?;
        self.db.delete_review(review_id)?;
        tracing::info!(user = %actor_id, review = review_id, "Review deleted");
        Ok(())
    }

    /// Delete any review, bypassing the author check.
    pub fn moderate_delete(&self, review_id: i64) -> Result<()> {
        if !self.db.delete_review(review_id)? {
            return Err(AppError::NotFound(format!("Review not found: {}", review_id)));
        }
        tracing::info!(review = review_id, "Review removed by moderator");
        Ok(())
    }

    /// Reviews of a book.
    pub fn for_book(&self, book_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.db.list_book_reviews(book_id)
    }

    /// Reviews written by a user.
    pub fn by_user(&self, user_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.db.list_user_reviews(user_id)
    }

    /// Reviews written by a user, most recently written first.
    pub fn history(&self, user_id: &str) -> Result<Vec<ReviewWithAuthor>> {
        self.db.list_user_review_history(user_id)
    }

    /// Every review, for moderation.
    pub fn all(&self) -> Result<Vec<ReviewWithAuthor>> {
        self.db.list_all_reviews()
    }
}
