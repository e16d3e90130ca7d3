// Data model and hub wire protocol shared by the Parlor crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
