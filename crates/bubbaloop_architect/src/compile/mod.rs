//! Compilation pipeline
//!
//! registry → resolver → validator → flatten → overlay → select

mod compiler;
mod flatten;
mod overlay;
mod registry;
mod resolver;
mod select;
mod validator;

pub use compiler::*;
pub use flatten::{
    assemble_wires, flatten_system, Ancestor, Edge, FlatComponent, FlatInstance, FlatSystem,
    Terminal, Wire,
};
pub use overlay::{
    overlay_system, unmatched_deployment_targets, EffectiveFile, EffectiveParameter,
    InstanceParameters, SystemOverlay, ValueSource,
};
pub use registry::*;
pub use resolver::{
    ResolvedChild, ResolvedComponent, ResolvedModule, ResolvedSystem, ResolvedTarget, Resolver,
};
pub use select::{select_mode, PreparedSystem, Selection};
pub use validator::{leaf_paths, relative_path, Interface, ModuleCheck, PortChecker};
