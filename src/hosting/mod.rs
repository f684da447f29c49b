pub mod diff;
pub mod error;
pub mod local;
pub mod sync;
