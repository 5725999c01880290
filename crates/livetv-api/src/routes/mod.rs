pub mod admin;
pub mod listing;
pub mod live;
