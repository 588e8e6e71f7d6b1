//! Definition loading, deployment overrides and substitution

mod deployment;
mod loader;
mod substitution;

pub use deployment::*;
pub use loader::*;
pub use substitution::*;
