pub(crate) mod api;
pub mod auth;
pub mod compress;
pub mod config;
pub mod error;
pub mod moderation;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod stream;
pub mod token;
pub mod transport;
pub mod writer;
