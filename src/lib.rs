pub mod catalog;
pub mod commands;
pub mod convert;
pub mod language;
pub mod location;
mod ordered;
pub mod output;
pub mod registers;
pub mod resolve;
pub mod session;
pub mod value_tables;
pub mod version;
