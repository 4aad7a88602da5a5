pub mod message;
pub mod session;
pub mod vehicle;
