pub mod common;
pub mod cvar;
