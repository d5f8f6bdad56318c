use tracing::debug;

use crate::core::cipher::FieldCipher;
use crate::core::db::RecordStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{find_caller, find_user};
use crate::models::models::{Document, User};

pub fn add_edge(follower: &mut User, target: &mut User) -> bool {
    let mut changed = false;
    if !follower.following.contains(&target.username) {
        follower.following.push(target.username.clone());
        changed = true;
    }
    if !target.followers.contains(&follower.username) {
        target.followers.push(follower.username.clone());
        changed = true;
    }
    changed
}

pub fn remove_edge(follower: &mut User, target: &mut User) -> bool {
    let before = follower.following.len() + target.followers.len();
    follower.following.retain(|t| *t != target.username);
    target.followers.retain(|t| *t != follower.username);
    before != follower.following.len() + target.followers.len()
}

fn edge_endpoints(
    doc: &Document,
    cipher: &FieldCipher,
    username: &str,
    target_username: &str,
) -> Result<(usize, usize), ApiError> {
    let me = find_caller(doc, cipher, username)?;
    let target = find_user(doc, cipher, target_username)
        .map_err(|_| ApiError::NotFound("Target user not found".to_string()))?;
    if me == target {
        return Err(ApiError::BadRequest("Invalid target user".to_string()));
    }
    Ok((me, target))
}

pub fn follow_user<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    target_username: &str,
) -> Result<(), ApiError> {
    store.transaction(|doc| {
        let (me, target) = edge_endpoints(doc, cipher, username, target_username)?;
        if let Some((follower, followed)) = doc.user_pair_mut(me, target) {
            let changed = add_edge(follower, followed);
            debug!(changed, "follow");
        }
        Ok(())
    })
}

pub fn unfollow_user<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    target_username: &str,
) -> Result<(), ApiError> {
    store.transaction(|doc| {
        let (me, target) = edge_endpoints(doc, cipher, username, target_username)?;
        if let Some((follower, followed)) = doc.user_pair_mut(me, target) {
            let changed = remove_edge(follower, followed);
            debug!(changed, "unfollow");
        }
        Ok(())
    })
}

pub fn is_following<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
    target_username: &str,
) -> Result<bool, ApiError> {
    let doc = store.load_all_records()?;
    let me = &doc.users[find_user(&doc, cipher, username)?];
    let target = &doc.users[find_user(&doc, cipher, target_username)?];
    Ok(me.following.contains(&target.username))
}

fn decrypt_all(cipher: &FieldCipher, tokens: &[String]) -> Result<Vec<String>, ApiError> {
    tokens.iter().map(|t| cipher.decrypt(t)).collect()
}

pub fn get_following<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
) -> Result<Vec<String>, ApiError> {
    let doc = store.load_all_records()?;
    let user = &doc.users[find_user(&doc, cipher, username)?];
    decrypt_all(cipher, &user.following)
}

pub fn get_followers<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    username: &str,
) -> Result<Vec<String>, ApiError> {
    let doc = store.load_all_records()?;
    let user = &doc.users[find_user(&doc, cipher, username)?];
    decrypt_all(cipher, &user.followers)
}
