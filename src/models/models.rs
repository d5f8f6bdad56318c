use serde::{Serialize, Deserialize};

// Every string except password and created is a cipher token; the username
// token is the user's identity everywhere else.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    pub created: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub replies: Vec<Reply>,
    pub timestamp: String,
    // mirror of user_id, written on every wind and reply for older readers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Document {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default, rename = "winds")]
    pub posts: Vec<Post>,
}

impl Document {
    pub fn user_index(&self, token: &str) -> Option<usize> {
        self.users.iter().position(|u| u.username == token)
    }

    pub fn user(&self, token: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == token)
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn post_mut(&mut self, id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    pub fn user_pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut User, &mut User)> {
        if a == b || a >= self.users.len() || b >= self.users.len() {
            return None;
        }
        if a < b {
            let (head, tail) = self.users.split_at_mut(b);
            Some((&mut head[a], &mut tail[0]))
        } else {
            let (head, tail) = self.users.split_at_mut(a);
            Some((&mut tail[0], &mut head[b]))
        }
    }
}
