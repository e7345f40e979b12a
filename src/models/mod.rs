pub mod documents;
pub mod notification;
pub mod user;
