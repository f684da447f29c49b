pub mod auth;
pub mod client;
pub mod error;
pub mod hosting;
pub mod multipart;
pub mod secrets;
