use std::collections::HashSet;

use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{SecondsFormat, Utc};
use html_escape::decode_html_entities;
use rand::rngs::OsRng;

use crate::config::{ADMIN_BADGE, DELETED_DISPLAY_NAME, DELETED_USERNAME};
use crate::core::cipher::FieldCipher;
use crate::core::errors::ApiError;
use crate::models::models::{Document, User};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::PasswordHash;

    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// ammonia escapes its output, so entities are decoded before storing
pub fn sanitize_text(text: &str) -> String {
    let cleaned = Builder::default()
        .tags(HashSet::new())
        .clean(text)
        .to_string();
    decode_html_entities(&cleaned).into_owned()
}

pub fn next_time_id<'a>(taken: impl Iterator<Item = &'a str> + Clone) -> String {
    let mut candidate = Utc::now().timestamp_millis();
    while taken.clone().any(|id| id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

pub fn username_token(cipher: &FieldCipher, username: &str) -> String {
    cipher.encrypt(&username.trim().to_lowercase())
}

pub fn find_user(doc: &Document, cipher: &FieldCipher, username: &str) -> Result<usize, ApiError> {
    doc.user_index(&username_token(cipher, username))
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

pub fn find_caller(doc: &Document, cipher: &FieldCipher, username: &str) -> Result<usize, ApiError> {
    find_user(doc, cipher, username).map_err(|_| ApiError::Unauthorized)
}

pub fn is_admin(cipher: &FieldCipher, user: &User) -> bool {
    user.badge
        .as_deref()
        .map(|badge| cipher.decrypt_or_raw(badge).eq_ignore_ascii_case(ADMIN_BADGE))
        .unwrap_or(false)
}

pub struct AuthorView {
    pub username: String,
    pub display_name: String,
    pub badge: String,
}

pub fn author_view(cipher: &FieldCipher, user: Option<&User>) -> Result<AuthorView, ApiError> {
    let Some(user) = user else {
        return Ok(AuthorView {
            username: DELETED_USERNAME.to_string(),
            display_name: DELETED_DISPLAY_NAME.to_string(),
            badge: String::new(),
        });
    };
    let username = cipher.decrypt(&user.username)?;
    let display_name = if user.display_name.is_empty() {
        username.clone()
    } else {
        cipher.decrypt(&user.display_name)?
    };
    let badge = user.badge.as_deref().map(|b| cipher.decrypt_or_raw(b)).unwrap_or_default();
    Ok(AuthorView { username, display_name, badge })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(sanitize_text("<b>hi</b> there<script>x()</script>"), "hi there");
    }

    #[test]
    fn sanitize_keeps_plain_text_unescaped() {
        assert_eq!(sanitize_text("Tom & Jerry <3"), "Tom & Jerry <3");
        assert_eq!(sanitize_text("A&B \"quoted\""), "A&B \"quoted\"");
    }

    #[test]
    fn time_ids_skip_taken_values() {
        let first = next_time_id(std::iter::empty());
        let taken = [first.clone()];
        let second = next_time_id(taken.iter().map(String::as_str));
        assert_ne!(first, second);
        assert!(second.parse::<i64>().unwrap() >= first.parse::<i64>().unwrap());
    }
}
