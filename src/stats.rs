//! Reading statistics.

use crate::db::Database;
use crate::error::Result;
use serde::Serialize;

/// Aggregated reading activity of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    /// Books in the collection.
    pub books_read: i64,
    /// Reviews written.
    pub reviews_written: i64,
    /// Mean rating rounded to one decimal, 0 without reviews.
    pub average_rating: f64,
    /// Yearly book target.
    pub reading_goal: u32,
    /// `books_read` as a percentage of the goal, may exceed 100.
    pub reading_goal_progress: u32,
}

/// Round to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Percentage of `goal` reached by `done`.
pub fn goal_progress(done: i64, goal: u32) -> u32 {
    if goal == 0 {
        return 0;
    }
    ((done.max(0) as f64 / goal as f64) * 100.0).round() as u32
}

/// Compute the statistics of a user.
pub fn user_stats(db: &Database, user_id: &str, reading_goal: u32) -> Result<UserStats> {
    let books_read = db.count_collection(user_id)?;
    let (reviews_written, average) = db.review_totals(user_id)?;

    Ok(UserStats {
        books_read,
        reviews_written,
        average_rating: average.map(round1).unwrap_or(0.0),
        reading_goal,
        reading_goal_progress: goal_progress(books_read, reading_goal),
    })
}
