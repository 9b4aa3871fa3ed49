//! Authentication module.

use crate::config::AuthConfig;
use crate::db::{Database, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use crate::mail::{LogMailer, Mailer, VerificationMail};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use std::sync::Arc;

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Symbols accepted by the password policy.
const PASSWORD_SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Check the password policy: length, uppercase letter, digit and symbol.
pub fn validate_password(password: &str) -> Result<()> {
    let rule = if password.chars().count() < MIN_PASSWORD_LEN {
        format!("Password must be at least {} characters", MIN_PASSWORD_LEN)
    } else if !password.chars().any(|c| c.is_ascii_uppercase()) {
        "Password must contain an uppercase letter".to_string()
    } else if !password.chars().any(|c| c.is_ascii_digit()) {
        "Password must contain a digit".to_string()
    } else if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        "Password must contain a symbol".to_string()
    } else {
        return Ok(());
    };

    Err(AppError::InvalidInput(rule))
}

/// Check a username: 1-64 letters, digits, `_` or `-`.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(AppError::InvalidInput(
            "Username must be 1-64 characters".to_string(),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::InvalidInput(
            "Username can only contain letters, numbers, _ and -".to_string(),
        ));
    }

    Ok(())
}

/// Normalize and check an email address.
fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::InvalidInput(format!(
            "Invalid email address: {}",
            email
        ))),
    }
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    registration_enabled: bool,
    require_verification: bool,
    public_url: String,
    mailer: Arc<dyn Mailer>,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, config: &AuthConfig) -> Self {
        Self {
            db,
            session_duration_days: config.session_days,
            registration_enabled: config.registration_enabled(),
            require_verification: config.require_verification,
            public_url: String::new(),
            mailer: Arc::new(LogMailer),
        }
    }

    /// Base URL used in verification links.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the mail transport.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Register a new user and send the verification mail.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Forbidden("Registration is disabled".to_string()));
        }

        let token = generate_token();
        let user = self.insert_user(username, email, password, "user", Some(token.clone()))?;

        let mail = VerificationMail {
            to: user.email.clone(),
            username: user.username.clone(),
            link: format!("{}/api/auth/verify-email/{}", self.public_url, token),
        };

        // Mail failures do not undo the registration.
        if let Err(e) = self.mailer.send_verification(&mail) {
            tracing::warn!(error = %e, email = %user.email, "Failed to send verification mail");
        }

        tracing::info!(user = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Create a verified user (admin function).
    pub fn create_user(&self, username: &str, email: &str, password: &str, role: &str) -> Result<User> {
        self.insert_user(username, email, password, role, None)
    }

    fn insert_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: &str,
        verification_token: Option<String>,
    ) -> Result<User> {
        validate_username(username)?;
        let email = normalize_email(email)?;
        validate_password(password)?;

        // Validate role
        if role != "admin" && role != "user" {
            return Err(AppError::InvalidInput(
                "Role must be 'admin' or 'user'".to_string(),
            ));
        }

        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(AppError::DuplicateEntry(format!(
                "Email already in use: {}",
                email
            )));
        }
        if self.db.get_user_by_username(username)?.is_some() {
            return Err(AppError::DuplicateEntry(format!(
                "Username already in use: {}",
                username
            )));
        }

        let password_hash = hash_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            password_hash,
            bio: None,
            avatar_url: None,
            role: role.to_string(),
            is_verified: verification_token.is_none(),
            verification_token,
            created_at: now_timestamp(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        Ok(user)
    }

    /// Confirm an email address from its verification token.
    pub fn verify_email(&self, token: &str) -> Result<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::InvalidInput(
                "Missing verification token".to_string(),
            ));
        }

        let mut user = self
            .db
            .get_user_by_verification_token(token)?
            .ok_or_else(|| AppError::InvalidInput("Invalid verification token".to_string()))?;

        self.db.mark_user_verified(&user.id)?;
        user.is_verified = true;
        user.verification_token = None;

        tracing::info!(user = %user.id, "Email verified");
        Ok(user)
    }

    /// Login and create a session.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

        let email = email.trim().to_lowercase();
        let user = self.db.get_user_by_email(&email)?.ok_or_else(invalid)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(invalid());
        }

        if self.require_verification && !user.is_verified {
            return Err(AppError::Unauthorized(
                "Please verify your email before logging in".to_string(),
            ));
        }

        // Update last login
        self.db.update_user_last_login(&user.id)?;

        // Create session
        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;

        Ok((user, token))
    }

    /// Validate a session token and return the user.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Logout (delete session).
    pub fn logout(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)
    }

    /// Change user password.
    pub fn change_password(&self, username: &str, new_password: &str) -> Result<bool> {
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(username, &password_hash)
    }

    /// Grant or revoke the admin role.
    pub fn set_role(&self, username: &str, role: &str) -> Result<bool> {
        if role != "admin" && role != "user" {
            return Err(AppError::InvalidInput(
                "Role must be 'admin' or 'user'".to_string(),
            ));
        }
        self.db.update_user_role(username, role)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Check if a user is admin.
    pub fn is_admin(&self, user: &User) -> bool {
        user.role == "admin"
    }
}
