pub mod error;
pub mod history;
