//! Plan file parsing and substitution

mod plan_file;
mod substitution;

pub use plan_file::*;
pub use substitution::*;
