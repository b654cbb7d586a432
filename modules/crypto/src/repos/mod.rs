pub mod wallet_repo;

pub use wallet_repo::{WalletError, WalletRepo};
