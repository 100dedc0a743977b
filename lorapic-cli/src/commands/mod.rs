//! Subcommand implementations

pub mod decode;
pub mod inspect;
pub mod pack;
pub mod receive;
