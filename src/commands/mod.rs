pub mod auth;
pub mod hosting;
pub mod secrets;
