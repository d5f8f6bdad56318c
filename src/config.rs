pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 16;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;
pub const MAX_BIO_LENGTH: usize = 160;
pub const MAX_POST_LENGTH: usize = 5000;

pub const RESERVED_USERNAMES: [&str; 5] = ["null", "undefined", "deleted_user", "administrator", "system"];
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_BADGE: &str = "Administrator";
pub const DELETED_USERNAME: &str = "deleted_user";
pub const DELETED_DISPLAY_NAME: &str = "Deleted User";

// Feed ranking weights
pub const TIME_WEIGHT: f64 = 1.0;
pub const LIKE_WEIGHT: f64 = 0.5;
pub const FOLLOW_WEIGHT: f64 = 2.0;
pub const SELF_WEIGHT: f64 = 3.0;
pub const PROXIMITY_WEIGHT: f64 = 2.5;
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const DEFAULT_ENCRYPTION_KEY: &str = "0123456789abcdef0123456789abcdef";
const DEFAULT_ENCRYPTION_IV: &str = "0123456789abcdef";

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn db_path() -> String {
    env_or("TIMEWIND_DB_PATH", "data/db.json")
}

pub fn profiles_dir() -> String {
    env_or("TIMEWIND_PROFILES_DIR", "data/profiles")
}

pub fn encryption_key() -> Vec<u8> {
    env_or("TIMEWIND_ENCRYPTION_KEY", DEFAULT_ENCRYPTION_KEY).into_bytes()
}

pub fn encryption_iv() -> Vec<u8> {
    env_or("TIMEWIND_ENCRYPTION_IV", DEFAULT_ENCRYPTION_IV).into_bytes()
}

pub fn admin_password() -> Option<String> {
    std::env::var("TIMEWIND_ADMIN_PASSWORD")
        .ok()
        .filter(|v| !v.is_empty())
}
