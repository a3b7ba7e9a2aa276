pub mod batch;
pub mod blob;
pub mod commands;
pub mod compare;
pub mod errors;
pub mod events;
pub mod history;
pub mod hotspot;
pub mod session;
pub mod summary;
