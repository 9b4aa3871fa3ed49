//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::catalog::CatalogClient;
use crate::collection::CollectionService;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::favorites::FavoriteService;
use crate::reviews::ReviewService;
use crate::users::UserService;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Favorite ranking.
    pub favorites: FavoriteService,
    /// Read-book collection.
    pub collection: CollectionService,
    /// Book reviews.
    pub reviews: ReviewService,
    /// Profiles and discovery.
    pub users: UserService,
    /// External book catalog.
    pub catalog: Arc<CatalogClient>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new_with_db(config: Config, db: Database, auth: AuthService) -> Result<Self> {
        let catalog = CatalogClient::new(&config.catalog)?;

        Ok(Self {
            favorites: FavoriteService::new(db.clone()),
            collection: CollectionService::new(db.clone()),
            reviews: ReviewService::new(db.clone()),
            users: UserService::new(db.clone(), &config.uploads),
            catalog: Arc::new(catalog),
            auth: Arc::new(auth),
            config: Arc::new(config),
            db,
        })
    }

    /// Yearly reading goal used in statistics.
    pub fn reading_goal(&self) -> u32 {
        self.config.stats.reading_goal
    }

    /// Periodically purge expired sessions and catalog cache entries.
    pub fn start_session_cleanup(&self) {
        let seconds = self.config.auth.session_cleanup_seconds;
        if seconds == 0 {
            return;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                match state.db.cleanup_expired_sessions() {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "Purged expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
                }

                let purged = state.catalog.purge_cache();
                tracing::debug!(purged, "Purged catalog cache");
            }
        });
    }
}
