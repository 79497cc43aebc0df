pub mod ai;
pub mod auth;
pub mod availability;
pub mod booking;
pub mod conversation;
pub mod directory;
