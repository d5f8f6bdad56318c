pub mod cipher;
pub mod db;
pub mod errors;
pub mod helpers;
pub mod pictures;
