pub mod config;
pub mod credential_issuer;
pub mod credential_store;
pub mod error;
pub mod oauth_client;
pub mod remote_api;
pub mod storage;
pub mod wire;
