pub mod chat;
pub mod diagnosis;
