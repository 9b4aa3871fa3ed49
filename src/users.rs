//! User profiles, avatars and discovery.

use crate::auth::validate_username;
use crate::config::UploadsConfig;
use crate::db::{Database, PublicProfile, User, UserSummary};
use crate::error::{AppError, Result};
use image::ImageFormat;
use std::path::PathBuf;

/// Maximum number of user search results.
pub const SEARCH_LIMIT: usize = 10;

/// Default number of suggested users.
pub const DEFAULT_SUGGESTIONS: usize = 5;

/// Upper bound on requested suggestions.
pub const MAX_SUGGESTIONS: usize = 50;

/// Longest accepted bio, in characters.
pub const MAX_BIO_CHARS: usize = 500;

/// URL prefix under which avatars are served.
pub const AVATAR_URL_PREFIX: &str = "/avatars/";

/// Detect an accepted avatar format from the image bytes.
pub fn avatar_extension(bytes: &[u8]) -> Result<&'static str> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Gif) => Ok("gif"),
        _ => Err(AppError::InvalidInput(
            "Avatar must be a JPEG, PNG or GIF image".to_string(),
        )),
    }
}

/// Content type for a stored avatar file name.
pub fn avatar_content_type(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Reject anything that is not a plain stored file name.
fn check_file_name(file_name: &str) -> Result<()> {
    let valid = !file_name.is_empty()
        && !file_name.starts_with('.')
        && file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Avatar not found: {}", file_name)))
    }
}

/// Profile changes; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New username.
    pub username: Option<String>,
    /// New bio; an empty string clears it.
    pub bio: Option<String>,
}

/// User profile service.
#[derive(Clone)]
pub struct UserService {
    db: Database,
    avatars_dir: PathBuf,
    max_avatar_bytes: usize,
}

impl UserService {
    /// Create a new user service.
    pub fn new(db: Database, uploads: &UploadsConfig) -> Self {
        Self {
            db,
            avatars_dir: uploads.avatars_dir.clone(),
            max_avatar_bytes: uploads.max_avatar_bytes,
        }
    }

    /// Load the account of a user.
    pub fn get(&self, user_id: &str) -> Result<User> {
        self.db
            .get_user_by_id(user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", user_id)))
    }

    /// Public profile of any user.
    pub fn profile(&self, user_id: &str) -> Result<PublicProfile> {
        self.db
            .get_public_profile(user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", user_id)))
    }

    /// Change username and/or bio.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<User> {
        let username = update.username.as_deref().map(str::trim);
        if let Some(name) = username {
            validate_username(name)?;
        }

        let bio = update.bio.as_deref().map(str::trim);
        if let Some(text) = bio
            && text.chars().count() > MAX_BIO_CHARS
        {
            return Err(AppError::InvalidInput(format!(
                "Bio must be at most {} characters",
                MAX_BIO_CHARS
            )));
        }

        if !self.db.update_profile(user_id, username, bio)? {
            return Err(AppError::NotFound(format!("User not found: {}", user_id)));
        }

        tracing::info!(user = %user_id, "Profile updated");
        self.get(user_id)
    }

    /// Store a new avatar and delete the previous file.
    pub async fn upload_avatar(&self, user_id: &str, bytes: &[u8]) -> Result<User> {
        if bytes.is_empty() {
            return Err(AppError::InvalidInput("Avatar image is empty".to_string()));
        }
        if bytes.len() > self.max_avatar_bytes {
            return Err(AppError::PayloadTooLarge(self.max_avatar_bytes));
        }
        let extension = avatar_extension(bytes)?;

        tokio::fs::create_dir_all(&self.avatars_dir).await?;
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), extension);
        let path = self.avatars_dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        let url = format!("{}{}", AVATAR_URL_PREFIX, file_name);
        let previous = match self.db.replace_avatar(user_id, &url) {
            Ok(previous) => previous,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };

        self.remove_avatar_file(previous.as_deref()).await;

        tracing::info!(user = %user_id, file = %file_name, size = bytes.len(), "Avatar updated");
        self.get(user_id)
    }

    /// Delete an account with everything it owns, avatar file included.
    pub async fn delete(&self, user_id: &str) -> Result<User> {
        let user = self.get(user_id)?;
        if !self.db.delete_user_by_id(user_id)? {
            return Err(AppError::NotFound(format!("User not found: {}", user_id)));
        }

        self.remove_avatar_file(user.avatar_url.as_deref()).await;
        tracing::info!(user = %user_id, username = %user.username, "User deleted");
        Ok(user)
    }

    /// Remove the stored file behind an avatar URL, if any.
    async fn remove_avatar_file(&self, avatar_url: Option<&str>) {
        if let Some(name) = avatar_url.and_then(|u| u.strip_prefix(AVATAR_URL_PREFIX))
            && check_file_name(name).is_ok()
            && let Err(e) = tokio::fs::remove_file(self.avatars_dir.join(name)).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, file = %name, "Failed to delete avatar file");
        }
    }

    /// Path of a stored avatar file.
    pub fn avatar_path(&self, file_name: &str) -> Result<PathBuf> {
        check_file_name(file_name)?;
        Ok(self.avatars_dir.join(file_name))
    }

    /// Find other users by username or email.
    pub fn search(&self, user_id: &str, query: Option<&str>) -> Result<Vec<UserSummary>> {
        let query = query.map(str::trim).unwrap_or_default();
        if query.is_empty() {
            return Err(AppError::InvalidInput(
                "Search query is required".to_string(),
            ));
        }
        self.db.search_users(query, user_id, SEARCH_LIMIT)
    }

    /// Most active readers other than `user_id`.
    pub fn suggested(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<UserSummary>> {
        let limit = limit.unwrap_or(DEFAULT_SUGGESTIONS).clamp(1, MAX_SUGGESTIONS);
        self.db.suggested_users(user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const GIF_MAGIC: &[u8] = b"GIF89a\x01\x00\x01\x00";
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    #[test]
    fn accepted_avatar_formats() {
        assert_eq!(avatar_extension(PNG_MAGIC).unwrap(), "png");
        assert_eq!(avatar_extension(GIF_MAGIC).unwrap(), "gif");
        assert_eq!(avatar_extension(JPEG_MAGIC).unwrap(), "jpg");
    }

    #[test]
    fn other_content_is_rejected() {
        assert!(avatar_extension(b"not an image at all").is_err());
        assert!(avatar_extension(b"BM\x00\x00\x00\x00").is_err());
    }

    #[test]
    fn stored_names_only() {
        assert!(check_file_name("0b6e3c1a-1111-2222-3333-444455556666.png").is_ok());
        assert!(check_file_name("../secret").is_err());
        assert!(check_file_name("a/b.png").is_err());
        assert!(check_file_name(".hidden").is_err());
        assert!(check_file_name("").is_err());
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(avatar_content_type("a.png"), "image/png");
        assert_eq!(avatar_content_type("a.jpg"), "image/jpeg");
        assert_eq!(avatar_content_type("a.gif"), "image/gif");
        assert_eq!(avatar_content_type("a"), "application/octet-stream");
    }
}
