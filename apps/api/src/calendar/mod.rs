pub mod handlers;
pub mod projection;
pub mod reminder;
