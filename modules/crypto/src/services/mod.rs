pub mod crypto_service;

pub use crypto_service::CryptoService;
