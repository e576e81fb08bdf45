pub mod apa;
pub mod core;
