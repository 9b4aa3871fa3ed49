//! Book catalog client for a Google Books compatible `volumes` API.

use crate::config::CatalogConfig;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Default number of search results.
pub const DEFAULT_MAX_RESULTS: u32 = 12;

/// Largest page the catalog returns.
pub const MAX_RESULTS_LIMIT: u32 = 40;

/// Shown when a book cannot be resolved.
pub const UNKNOWN_TITLE: &str = "Unknown title";

/// Shown when a book has no known author.
pub const UNKNOWN_AUTHOR: &str = "Unknown author";

/// Book metadata from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookInfo {
    /// Catalog identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Authors, possibly empty.
    pub authors: Vec<String>,
    /// Cover thumbnail URL.
    pub thumbnail: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Publication date as given by the catalog.
    pub published_date: Option<String>,
    /// Number of pages.
    pub page_count: Option<u32>,
}

/// Short book description for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSummary {
    /// Title, or a placeholder.
    pub title: String,
    /// First author, or a placeholder.
    pub author: String,
    /// Cover thumbnail URL.
    pub cover_image: Option<String>,
}

impl BookSummary {
    fn unknown() -> Self {
        Self {
            title: UNKNOWN_TITLE.to_string(),
            author: UNKNOWN_AUTHOR.to_string(),
            cover_image: None,
        }
    }
}

impl From<&BookInfo> for BookSummary {
    fn from(book: &BookInfo) -> Self {
        Self {
            title: book.title.clone(),
            author: book
                .authors
                .first()
                .cloned()
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            cover_image: book.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VolumeList {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    id: String,
    #[serde(default, rename = "volumeInfo")]
    info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    authors: Vec<String>,
    description: Option<String>,
    published_date: Option<String>,
    page_count: Option<u32>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageLinks {
    thumbnail: Option<String>,
}

impl From<Volume> for BookInfo {
    fn from(volume: Volume) -> Self {
        let info = volume.info;
        Self {
            id: volume.id,
            title: info.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            authors: info.authors,
            thumbnail: info.image_links.and_then(|l| l.thumbnail),
            description: info.description,
            published_date: info.published_date,
            page_count: info.page_count,
        }
    }
}

/// In-memory map whose entries expire after a fixed time.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`; an expired entry is dropped.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut entries = self.entries.lock();
        if let Some((value, expires)) = entries.get(key)
            && *expires > Instant::now()
        {
            return Some(value.clone());
        }
        entries.remove(key);
        None
    }

    /// Store a value for one TTL.
    pub fn insert(&self, key: K, value: V) {
        let expires = Instant::now() + self.ttl;
        self.entries.lock().insert(key, (value, expires));
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Catalog client with caching and request throttling.
pub struct CatalogClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    language: Option<String>,
    throttle: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    books: TtlCache<String, BookInfo>,
    searches: TtlCache<(String, u32), Vec<BookInfo>>,
}

impl CatalogClient {
    /// Create a client from configuration.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("mybook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let ttl = Duration::from_secs(config.cache_ttl_seconds);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            language: config.language.clone().filter(|l| !l.is_empty()),
            throttle: Duration::from_millis(config.throttle_ms),
            last_request: tokio::sync::Mutex::new(None),
            books: TtlCache::new(ttl),
            searches: TtlCache::new(ttl),
        })
    }

    /// Wait until the throttle interval since the previous request has passed.
    async fn throttle(&self) {
        if self.throttle.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.throttle {
                tokio::time::sleep(self.throttle - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        }
    }

    /// Look up a single book.
    pub async fn lookup(&self, book_id: &str) -> Result<BookInfo> {
        if let Some(book) = self.books.get(book_id) {
            return Ok(book);
        }

        let url = format!("{}/volumes/{}", self.base_url, urlencoding::encode(book_id));
        self.throttle().await;

        let response = self.with_key(self.client.get(&url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(format!("Book not found: {}", book_id)));
            }
            status if !status.is_success() => {
                return Err(AppError::Catalog(format!(
                    "Catalog returned {} for book {}",
                    status, book_id
                )));
            }
            _ => {}
        }

        let volume: Volume = response.json().await?;
        let book = BookInfo::from(volume);
        self.books.insert(book_id.to_string(), book.clone());

        tracing::debug!(book = %book_id, "Catalog lookup");
        Ok(book)
    }

    /// Search books by free text.
    pub async fn search(&self, query: &str, max_results: Option<u32>) -> Result<Vec<BookInfo>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput(
                "Search query is required".to_string(),
            ));
        }

        let max_results = max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);
        let key = (query.to_string(), max_results);
        if let Some(results) = self.searches.get(&key) {
            return Ok(results);
        }

        let mut params = vec![
            ("q", query.to_string()),
            ("maxResults", max_results.to_string()),
            ("printType", "books".to_string()),
        ];
        if let Some(lang) = &self.language {
            params.push(("langRestrict", lang.clone()));
        }

        self.throttle().await;
        let url = format!("{}/volumes", self.base_url);
        let response = self
            .with_key(self.client.get(&url).query(&params))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Catalog(format!(
                "Catalog search returned {}",
                response.status()
            )));
        }

        let list: VolumeList = response.json().await?;
        let results: Vec<BookInfo> = list.items.into_iter().map(BookInfo::from).collect();

        tracing::debug!(query = %query, results = results.len(), "Catalog search");
        self.searches.insert(key, results.clone());
        Ok(results)
    }

    /// Title, first author and cover of a book, with placeholders when the
    /// catalog cannot resolve it.
    pub async fn summary_or_placeholder(&self, book_id: &str) -> BookSummary {
        match self.lookup(book_id).await {
            Ok(book) => BookSummary::from(&book),
            Err(e) => {
                tracing::debug!(book = %book_id, error = %e, "Catalog lookup failed");
                BookSummary::unknown()
            }
        }
    }

    /// Drop expired cache entries.
    pub fn purge_cache(&self) -> usize {
        self.books.purge_expired() + self.searches.purge_expired()
    }
}
