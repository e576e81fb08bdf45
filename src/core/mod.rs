pub mod chromosome;
pub mod contacts;
pub mod errors;
pub mod loops;
pub mod source;
pub mod utils;
