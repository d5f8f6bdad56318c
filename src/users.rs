use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::*;
use crate::core::cipher::FieldCipher;
use crate::core::db::RecordStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{
    author_view, find_caller, find_user, hash_password, is_admin, now_iso, sanitize_text,
    username_token, verify_password,
};
use crate::core::pictures::ProfilePictures;
use crate::models::models::{Document, GeoPoint, User};

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub badge: String,
    pub followers: usize,
    pub following: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub username: String,
    pub display_name: String,
    pub badge: String,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub new_username: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._]+$").expect("Regex should compile"))
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username_regex().is_match(username) {
        return Err(ApiError::BadRequest(
            "Username can only contain letters, numbers, dots and underscores".to_string(),
        ));
    }
    if RESERVED_USERNAMES.contains(&username.to_lowercase().as_str()) {
        return Err(ApiError::BadRequest("This username is not allowed".to_string()));
    }
    Ok(())
}

fn profile_view(cipher: &FieldCipher, user: &User) -> Result<ProfileView, ApiError> {
    let author = author_view(cipher, Some(user))?;
    Ok(ProfileView {
        username: author.username,
        display_name: author.display_name,
        bio: if user.bio.is_empty() { String::new() } else { cipher.decrypt(&user.bio)? },
        badge: author.badge,
        followers: user.followers.len(),
        following: user.following.len(),
    })
}

fn user_summary(cipher: &FieldCipher, user: &User) -> Result<UserSummary, ApiError> {
    let author = author_view(cipher, Some(user))?;
    Ok(UserSummary {
        username: author.username,
        display_name: author.display_name,
        badge: author.badge,
    })
}

fn insert_user(
    doc: &mut Document,
    cipher: &FieldCipher,
    username: &str,
    email: &str,
    password: &str,
) -> Result<usize, ApiError> {
    let username = username.trim().to_lowercase();
    let email = email.trim().to_lowercase();
    validate_username(&username)?;
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let token = cipher.encrypt(&username);
    if doc.user(&token).is_some() {
        return Err(ApiError::Conflict("Username already exists".to_string()));
    }
    let email_token = cipher.encrypt(&email);
    if doc.users.iter().any(|u| u.email == email_token) {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }

    doc.users.push(User {
        username: token.clone(),
        display_name: token,
        bio: cipher.encrypt(""),
        email: email_token,
        password: hash_password(password)?,
        location: None,
        following: Vec::new(),
        followers: Vec::new(),
        badge: None,
        created: now_iso(),
    });
    Ok(doc.users.len() - 1)
}

pub fn register_user<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    email: &str,
    password: &str,
) -> Result<ProfileView, ApiError> {
    let view = store.transaction(|doc| {
        let idx = insert_user(doc, cipher, username, email, password)?;
        profile_view(cipher, &doc.users[idx])
    })?;
    info!(username = %view.username, "registered user");
    Ok(view)
}

pub fn verify_credentials<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    password: &str,
) -> Result<bool, ApiError> {
    let doc = store.load_all_records()?;
    Ok(match doc.user(&username_token(cipher, username)) {
        Some(user) => verify_password(password, &user.password),
        None => false,
    })
}

pub fn get_profile<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
) -> Result<ProfileView, ApiError> {
    let doc = store.load_all_records()?;
    profile_view(cipher, &doc.users[find_user(&doc, cipher, username)?])
}

fn replace_token(list: &mut [String], old: &str, new: &str) {
    for token in list.iter_mut().filter(|t| t.as_str() == old) {
        *token = new.to_string();
    }
}

pub fn rename_token(doc: &mut Document, old: &str, new: &str) {
    for user in &mut doc.users {
        if user.username == old {
            user.username = new.to_string();
        }
        replace_token(&mut user.following, old, new);
        replace_token(&mut user.followers, old, new);
    }
    for post in &mut doc.posts {
        if post.user_id == old {
            post.user_id = new.to_string();
        }
        if post.username.as_deref() == Some(old) {
            post.username = Some(new.to_string());
        }
        replace_token(&mut post.likes, old, new);
        for reply in &mut post.replies {
            if reply.user_id == old {
                reply.user_id = new.to_string();
            }
            if reply.username.as_deref() == Some(old) {
                reply.username = Some(new.to_string());
            }
            replace_token(&mut reply.likes, old, new);
        }
    }
}

fn apply_profile_update(
    doc: &mut Document,
    cipher: &FieldCipher,
    idx: usize,
    update: &ProfileUpdate,
) -> Result<Option<(String, String)>, ApiError> {
    let admin = is_admin(cipher, &doc.users[idx]);
    let clean = |text: &str| if admin { text.to_string() } else { sanitize_text(text) };

    if let Some(display_name) = update.display_name.as_deref().filter(|d| !d.is_empty()) {
        let display_name = clean(display_name);
        if display_name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "Display name cannot exceed {} characters",
                MAX_DISPLAY_NAME_LENGTH
            )));
        }
        doc.users[idx].display_name = cipher.encrypt(&display_name);
    }

    if let Some(bio) = update.bio.as_deref() {
        let bio = clean(bio);
        if bio.chars().count() > MAX_BIO_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "Bio cannot exceed {} characters",
                MAX_BIO_LENGTH
            )));
        }
        doc.users[idx].bio = cipher.encrypt(&bio);
    }

    let Some(new_username) = update.new_username.as_deref() else {
        return Ok(None);
    };
    let new_username = new_username.trim().to_lowercase();
    let old = doc.users[idx].username.clone();
    let new = cipher.encrypt(&new_username);
    if new == old {
        return Ok(None);
    }

    validate_username(&new_username)?;
    if doc.user(&new).is_some() {
        return Err(ApiError::Conflict("Username already taken".to_string()));
    }
    if admin {
        return Err(ApiError::Forbidden);
    }

    rename_token(doc, &old, &new);
    Ok(Some((old, new)))
}

// The picture moves before the save and moves back if the save fails
pub fn update_profile<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    pictures: &ProfilePictures,
    username: &str,
    update: &ProfileUpdate,
) -> Result<ProfileView, ApiError> {
    let mut moved: Option<(String, String)> = None;
    let result = store.transaction(|doc| {
        let idx = find_caller(doc, cipher, username)?;
        if let Some((old, new)) = apply_profile_update(doc, cipher, idx, update)? {
            pictures.rename_key(&old, &new)?;
            moved = Some((old, new));
        }
        profile_view(cipher, &doc.users[idx])
    });

    match (result, moved) {
        (Ok(view), Some(_)) => {
            info!(from = %username, to = %view.username, "renamed user");
            Ok(view)
        }
        (Ok(view), None) => Ok(view),
        (Err(e), Some((old, new))) => {
            if let Err(undo) = pictures.rename_key(&new, &old) {
                warn!(error = %undo, "profile picture left under new key");
            }
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

pub fn update_location<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    location: Option<GeoPoint>,
) -> Result<(), ApiError> {
    if matches!(location, Some(point) if !point.is_valid()) {
        return Err(ApiError::BadRequest("Invalid location".to_string()));
    }
    store.transaction(|doc| {
        let idx = find_caller(doc, cipher, username)?;
        doc.users[idx].location = location.map(|l| cipher.encrypt_location(&l)).transpose()?;
        Ok(())
    })
}

fn require_admin(doc: &Document, cipher: &FieldCipher, username: &str) -> Result<(), ApiError> {
    let idx = find_caller(doc, cipher, username)?;
    if !is_admin(cipher, &doc.users[idx]) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

pub fn list_users<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    admin_username: &str,
) -> Result<Vec<UserSummary>, ApiError> {
    let doc = store.load_all_records()?;
    require_admin(&doc, cipher, admin_username)?;
    doc.users.iter().map(|u| user_summary(cipher, u)).collect()
}

pub fn set_badge<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    admin_username: &str,
    username: &str,
    badge: Option<&str>,
) -> Result<UserSummary, ApiError> {
    let summary = store.transaction(|doc| {
        require_admin(doc, cipher, admin_username)?;
        let idx = find_user(doc, cipher, username)?;
        if !is_admin(cipher, &doc.users[idx]) {
            doc.users[idx].badge = badge
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| cipher.encrypt(b));
        }
        user_summary(cipher, &doc.users[idx])
    })?;
    info!(username = %summary.username, badge = %summary.badge, "badge updated");
    Ok(summary)
}

pub fn ensure_admin_account<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    password: &str,
) -> Result<bool, ApiError> {
    let created = store.transaction(|doc| {
        if doc.user(&cipher.encrypt(ADMIN_USERNAME)).is_some() {
            return Ok(false);
        }
        let email = format!("{}@timewind.local", ADMIN_USERNAME);
        let idx = insert_user(doc, cipher, ADMIN_USERNAME, &email, password)?;
        let admin = &mut doc.users[idx];
        admin.display_name = cipher.encrypt("Admin");
        admin.badge = Some(cipher.encrypt(ADMIN_BADGE));
        admin.bio = cipher.encrypt("System Administrator");
        Ok::<_, ApiError>(true)
    })?;
    if created {
        info!("created admin account");
    }
    Ok(created)
}

pub fn bootstrap_admin<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
) -> Result<bool, ApiError> {
    match admin_password() {
        Some(password) => ensure_admin_account(store, cipher, &password),
        None => Ok(false),
    }
}
