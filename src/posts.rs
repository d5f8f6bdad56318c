use serde::Serialize;
use tracing::{debug, info};

use crate::config::*;
use crate::core::cipher::FieldCipher;
use crate::core::db::RecordStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{author_view, find_caller, find_user, is_admin, next_time_id, now_iso};
use crate::models::models::{Document, GeoPoint, Post, Reply};

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub badge: String,
    pub content: String,
    pub location: Option<GeoPoint>,
    pub like_count: usize,
    pub is_liked: bool,
    pub reply_count: usize,
    pub timestamp: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyView {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub badge: String,
    pub content: String,
    pub like_count: usize,
    pub is_liked: bool,
    pub timestamp: String,
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() || content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest("Invalid content".to_string()));
    }
    Ok(())
}

fn validate_location(location: Option<GeoPoint>) -> Result<(), ApiError> {
    match location {
        Some(point) if !point.is_valid() => Err(ApiError::BadRequest("Invalid location".to_string())),
        _ => Ok(()),
    }
}

fn toggle(list: &mut Vec<String>, token: &str) -> bool {
    match list.iter().position(|t| t == token) {
        Some(i) => {
            list.remove(i);
            false
        }
        None => {
            list.push(token.to_string());
            true
        }
    }
}

fn post_not_found() -> ApiError {
    ApiError::NotFound("Post not found".to_string())
}

fn reply_not_found() -> ApiError {
    ApiError::NotFound("Reply not found".to_string())
}

fn may_delete(doc: &Document, cipher: &FieldCipher, caller: usize, owner: &str) -> bool {
    let me = &doc.users[caller];
    me.username == owner || is_admin(cipher, me)
}

fn post_view(doc: &Document, cipher: &FieldCipher, post: &Post, viewer: &str) -> Result<PostView, ApiError> {
    let author = doc
        .user(&post.user_id)
        .ok_or_else(|| ApiError::NotFound("Post author not found".to_string()))?;
    let author = author_view(cipher, Some(author))?;
    Ok(PostView {
        id: post.id.clone(),
        username: author.username,
        display_name: author.display_name,
        badge: author.badge,
        content: cipher.decrypt(&post.content)?,
        location: cipher.decrypt_location(post.location.as_deref())?,
        like_count: post.likes.len(),
        is_liked: post.likes.iter().any(|t| t == viewer),
        reply_count: post.replies.len(),
        timestamp: post.timestamp.clone(),
    })
}

pub fn create_post<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    content: &str,
    location: Option<GeoPoint>,
) -> Result<PostView, ApiError> {
    validate_content(content)?;
    validate_location(location)?;

    store.transaction(|doc| {
        let author = doc.users[find_caller(doc, cipher, username)?].username.clone();
        let post = Post {
            id: next_time_id(doc.posts.iter().map(|p| p.id.as_str())),
            user_id: author.clone(),
            content: cipher.encrypt(content),
            location: location.map(|l| cipher.encrypt_location(&l)).transpose()?,
            likes: Vec::new(),
            replies: Vec::new(),
            timestamp: now_iso(),
            username: Some(author.clone()),
        };
        debug!(post = %post.id, "created post");
        let view = post_view(doc, cipher, &post, &author)?;
        doc.posts.push(post);
        Ok(view)
    })
}

pub fn toggle_like<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    username: &str,
) -> Result<bool, ApiError> {
    store.transaction(|doc| {
        let me = doc.users[find_caller(doc, cipher, username)?].username.clone();
        let post = doc.post_mut(post_id).ok_or_else(post_not_found)?;
        Ok(toggle(&mut post.likes, &me))
    })
}

pub fn reply_to_post<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    username: &str,
    content: &str,
) -> Result<ReplyView, ApiError> {
    validate_content(content)?;

    store.transaction(|doc| {
        let caller = find_caller(doc, cipher, username)?;
        let me = doc.users[caller].username.clone();
        let author = author_view(cipher, Some(&doc.users[caller]))?;

        let post = doc.post_mut(post_id).ok_or_else(post_not_found)?;
        let reply = Reply {
            id: next_time_id(post.replies.iter().map(|r| r.id.as_str())),
            user_id: me.clone(),
            content: cipher.encrypt(content),
            timestamp: now_iso(),
            likes: Vec::new(),
            username: Some(me),
        };
        let view = ReplyView {
            id: reply.id.clone(),
            username: author.username,
            display_name: author.display_name,
            badge: author.badge,
            content: content.to_string(),
            like_count: 0,
            is_liked: false,
            timestamp: reply.timestamp.clone(),
        };
        post.replies.push(reply);
        Ok(view)
    })
}

pub fn toggle_reply_like<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    reply_id: &str,
    username: &str,
) -> Result<bool, ApiError> {
    store.transaction(|doc| {
        let me = doc.users[find_caller(doc, cipher, username)?].username.clone();
        let post = doc.post_mut(post_id).ok_or_else(post_not_found)?;
        let reply = post
            .replies
            .iter_mut()
            .find(|r| r.id == reply_id)
            .ok_or_else(reply_not_found)?;
        Ok(toggle(&mut reply.likes, &me))
    })
}

pub fn delete_post<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    username: &str,
) -> Result<(), ApiError> {
    store.transaction(|doc| {
        let caller = find_caller(doc, cipher, username)?;
        let owner = doc.post(post_id).ok_or_else(post_not_found)?.user_id.clone();
        if !may_delete(doc, cipher, caller, &owner) {
            return Err(ApiError::Forbidden);
        }
        doc.posts.retain(|p| p.id != post_id);
        info!(post = %post_id, "deleted post");
        Ok(())
    })
}

pub fn delete_reply<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    reply_id: &str,
    username: &str,
) -> Result<(), ApiError> {
    store.transaction(|doc| {
        let caller = find_caller(doc, cipher, username)?;
        let owner = doc
            .post(post_id)
            .ok_or_else(post_not_found)?
            .replies
            .iter()
            .find(|r| r.id == reply_id)
            .ok_or_else(reply_not_found)?
            .user_id
            .clone();
        if !may_delete(doc, cipher, caller, &owner) {
            return Err(ApiError::Forbidden);
        }
        if let Some(post) = doc.post_mut(post_id) {
            post.replies.retain(|r| r.id != reply_id);
        }
        info!(post = %post_id, reply = %reply_id, "deleted reply");
        Ok(())
    })
}

pub fn get_post<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    viewer: &str,
) -> Result<PostView, ApiError> {
    let doc = store.load_all_records()?;
    let me = &doc.users[find_caller(&doc, cipher, viewer)?].username;
    let post = doc.post(post_id).ok_or_else(post_not_found)?;
    post_view(&doc, cipher, post, me)
}

pub fn list_replies<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    post_id: &str,
    viewer: &str,
) -> Result<Vec<ReplyView>, ApiError> {
    let doc = store.load_all_records()?;
    let me = &doc.users[find_caller(&doc, cipher, viewer)?].username;
    let post = doc.post(post_id).ok_or_else(post_not_found)?;

    post.replies
        .iter()
        .map(|reply| -> Result<ReplyView, ApiError> {
            let author = author_view(cipher, doc.user(&reply.user_id))?;
            Ok(ReplyView {
                id: reply.id.clone(),
                username: author.username,
                display_name: author.display_name,
                badge: author.badge,
                content: cipher.decrypt(&reply.content)?,
                like_count: reply.likes.len(),
                is_liked: reply.likes.iter().any(|t| t == me),
                timestamp: reply.timestamp.clone(),
            })
        })
        .collect()
}

pub fn user_posts<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    viewer: &str,
) -> Result<Vec<PostView>, ApiError> {
    let doc = store.load_all_records()?;
    let me = &doc.users[find_caller(&doc, cipher, viewer)?].username;
    let author = &doc.users[find_user(&doc, cipher, username)?].username;

    let mut posts: Vec<&Post> = doc.posts.iter().filter(|p| p.user_id == *author).collect();
    // now_iso() timestamps are fixed width, so they sort lexically
    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

    posts.into_iter().map(|p| post_view(&doc, cipher, p, me)).collect()
}
