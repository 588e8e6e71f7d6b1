//! Test helpers: definition fixtures and registry builders

#![allow(dead_code)]

use bubbaloop_architect::model::{Entity, EntityRef};
use bubbaloop_architect::{compile, CompileOptions, CompileReport, EntityRegistry};
use std::path::Path;

pub const DETECTOR: &str = r#"
name: Detector.node
launch:
  package: perception_pkg
  plugin: perception::Detector
  use_container: true
inputs:
  - name: image
    message_type: sensor_msgs/msg/Image
outputs:
  - name: objects
    message_type: perception_msgs/msg/DetectedObjects
parameters:
  - { name: score_threshold, type: double, default: 0.5 }
parameter_files:
  - { name: model_param, default: config/detector.param.yaml }
processes:
  - name: detect
    trigger_conditions:
      - on_input: image
    outcomes:
      - to_output: objects
"#;

pub const PERCEPTION: &str = r#"
name: Perception.module
instances:
  - { instance: detector, entity: Detector.node }
external_interfaces:
  input: [ { name: image } ]
  output: [ { name: objects } ]
connections:
  - { from: input.image, to: detector.input.image }
  - { from: detector.output.objects, to: output.objects }
"#;

pub const VEHICLE: &str = r#"
name: Vehicle.system
components:
  - component: perception_1
    entity: Perception.module
    namespace: /perception
"#;

pub const CAMERA: &str = r#"
name: Camera.node
launch: { package: camera_pkg, executable: camera_node }
outputs:
  - name: image
    message_type: sensor_msgs/msg/Image
parameters:
  - { name: fps, type: int, default: 30 }
"#;

pub const TRACKER: &str = r#"
name: Tracker.node
launch: { package: tracking_pkg, executable: tracker }
inputs:
  - name: objects
    message_type: perception_msgs/msg/DetectedObjects
outputs:
  - name: tracks
    message_type: perception_msgs/msg/TrackedObjects
"#;

/// Parse a definition, taking its kind from the `name:` suffix
pub fn entity(yaml: &str) -> Entity {
    let name = yaml
        .lines()
        .find_map(|line| line.strip_prefix("name:"))
        .expect("definition has a name")
        .trim();
    let reference: EntityRef = name.parse().expect("valid entity reference");
    Entity::from_yaml(reference.kind, yaml).expect("valid definition")
}

pub fn registry(docs: &[&str]) -> EntityRegistry {
    EntityRegistry::from_entities(docs.iter().map(|yaml| entity(yaml)))
}

pub fn compile_all(docs: &[&str]) -> CompileReport {
    compile(&registry(docs), &CompileOptions::new()).expect("compiles")
}

/// Write `(relative path, contents)` pairs below `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
