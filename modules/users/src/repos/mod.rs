pub mod user_repo;

pub use user_repo::{UserError, UserRepo};
