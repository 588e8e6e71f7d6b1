//! Bubbaloop Architect
//!
//! Compiles hierarchical architecture definitions into deployment graphs.
//!
//! # Overview
//!
//! The architect allows you to:
//! - Describe nodes (ports, parameters, processes) once and reuse them
//! - Group nodes into modules with an external interface, nesting freely
//! - Compose a system from components, each bound to a namespace, a compute
//!   unit, parameter sets and operation modes
//! - Compile every (system, mode) pair into a flat, validated graph with
//!   resolved wires and layered parameters
//!
//! # Example Definitions
//!
//! ```yaml
//! # detector.node.yaml
//! name: Detector.node
//! launch:
//!   package: perception_pkg
//!   plugin: perception::Detector
//! inputs:
//!   - { name: image, message_type: sensor_msgs/msg/Image }
//! outputs:
//!   - { name: objects, message_type: perception_msgs/msg/DetectedObjects }
//! parameters:
//!   - { name: score_threshold, type: double, default: 0.5 }
//!
//! # perception.module.yaml
//! name: Perception.module
//! instances:
//!   - { instance: detector, entity: Detector.node }
//! external_interfaces:
//!   input: [ { name: image } ]
//!   output: [ { name: objects } ]
//! connections:
//!   - { from: input.image, to: detector.input.image }
//!   - { from: detector.output.objects, to: output.objects }
//!
//! # vehicle.system.yaml
//! name: Vehicle.system
//! components:
//!   - { component: perception_1, entity: Perception.module, namespace: /perception }
//! ```
//!
//! Compiling `Vehicle` yields one instance `/perception/perception_1/detector`
//! and one wire `/perception/perception_1/detector/objects`.

pub mod cli;
pub mod compile;
pub mod config;
pub mod diagnostic;
pub mod graph;
pub mod model;

pub use cli::ArchitectArgs;
pub use compile::{
    compile, CompileError, CompileOptions, CompileReport, EntityRegistry, PairOutcome,
};
pub use config::{
    load_definitions, DeploymentOverrides, LoadError, LoadResult, OverrideError,
    SubstitutionContext, SubstitutionError,
};
pub use diagnostic::{Diagnostic, Locator, Severity, Violation};
pub use graph::{
    write_artifacts, ArtifactError, DeploymentGraph, Endpoint, PortBinding, ResolvedConnection,
    ResolvedNodeInstance,
};
