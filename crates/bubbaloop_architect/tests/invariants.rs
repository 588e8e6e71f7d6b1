//! Graph-level guarantees: unique paths, matching types, one producer per
//! wire, acyclic composition, mode filtering and override precedence

mod common;

use bubbaloop_architect::compile::ValueSource;
use bubbaloop_architect::model::ParameterValue;
use bubbaloop_architect::{
    compile, CompileOptions, CompileReport, DeploymentGraph, DeploymentOverrides, Violation,
};
use common::{compile_all, registry, CAMERA, DETECTOR, PERCEPTION, TRACKER};

fn codes(report: &CompileReport, system: &str, mode: &str) -> Vec<&'static str> {
    report
        .outcome(system, mode)
        .unwrap()
        .diagnostics
        .iter()
        .map(|d| d.violation.code())
        .collect()
}

fn assert_well_formed(graph: &DeploymentGraph) {
    let mut paths: Vec<&str> = graph.instances.iter().map(|i| i.path.as_str()).collect();
    paths.dedup();
    assert_eq!(paths.len(), graph.instances.len(), "instance paths are unique");

    let mut wires: Vec<&str> = graph.connections.iter().map(|c| c.wire.as_str()).collect();
    wires.dedup();
    assert_eq!(wires.len(), graph.connections.len(), "one producer per wire");

    for connection in &graph.connections {
        let producer = graph.instance(&connection.producer.path).unwrap();
        assert_eq!(
            producer.outputs[&connection.producer.port].data_type,
            connection.data_type
        );
        for consumer in &connection.consumers {
            let instance = graph.instance(&consumer.path).unwrap();
            assert_eq!(instance.inputs[&consumer.port].data_type, connection.data_type);
            assert_eq!(
                instance.inputs[&consumer.port].wire.as_deref(),
                Some(connection.wire.as_str())
            );
        }
    }
}

const PIPELINE: &str = r#"
name: Pipeline.system
modes: [ default, simulation ]
components:
  - { component: camera, entity: Camera.node, namespace: /sensing, compute_unit: ecu_a }
  - { component: perception_1, entity: Perception.module, namespace: /perception, compute_unit: ecu_b }
  - { component: tracker, entity: Tracker.node, namespace: /perception, compute_unit: ecu_b }
  - { component: replay, entity: Camera.node, namespace: /sim, mode: simulation }
connections:
  - { from: camera.output.image, to: perception_1.input.image }
  - { from: perception_1.output.objects, to: tracker.input.objects }
"#;

#[test]
fn test_wires_splice_through_module_boundaries() {
    let report = compile_all(&[CAMERA, DETECTOR, TRACKER, PERCEPTION, PIPELINE]);
    assert!(report.is_success(), "{}", report);

    let graph = report.outcome("Pipeline", "default").unwrap().graph.as_ref().unwrap();
    assert_well_formed(graph);

    let image = graph.connection("/sensing/camera/image").unwrap();
    assert_eq!(image.consumers.len(), 1);
    assert_eq!(image.consumers[0].path, "/perception/perception_1/detector");

    let objects = graph.connection("/perception/perception_1/detector/objects").unwrap();
    assert_eq!(objects.consumers[0].path, "/perception/tracker");

    let packages = graph.packages_by_compute_unit();
    assert_eq!(packages["ecu_a"], vec!["camera_pkg"]);
    assert_eq!(packages["ecu_b"], vec!["perception_pkg", "tracking_pkg"]);
}

#[test]
fn test_mode_filtering() {
    let report = compile_all(&[CAMERA, DETECTOR, TRACKER, PERCEPTION, PIPELINE]);

    let default = report.outcome("Pipeline", "default").unwrap().graph.as_ref().unwrap();
    assert!(default.instance("/sim/replay").is_none());

    let simulation = report
        .outcome("Pipeline", "simulation")
        .unwrap()
        .graph
        .as_ref()
        .unwrap();
    assert!(simulation.instance("/sim/replay").is_some());
    assert_eq!(simulation.instances.len(), default.instances.len() + 1);
    assert_well_formed(simulation);
}

#[test]
fn test_requested_unknown_mode() {
    let registry = registry(&[CAMERA, DETECTOR, TRACKER, PERCEPTION, PIPELINE]);
    let options = CompileOptions::new().with_system("Pipeline").with_mode("flight");
    let report = compile(&registry, &options).unwrap();
    assert!(!report.is_success());
    assert_eq!(codes(&report, "Pipeline", "flight"), vec!["unknown_mode"]);
}

#[test]
fn test_type_mismatch_blocks_graph() {
    let broken = r#"
name: Broken.module
instances:
  - { instance: camera, entity: Camera.node }
  - { instance: tracker, entity: Tracker.node }
connections:
  - { from: camera.output.image, to: tracker.input.objects }
"#;
    let system = "name: Rig.system\ncomponents: [ { component: rig, entity: Broken.module } ]";
    let report = compile_all(&[CAMERA, TRACKER, broken, system]);

    let outcome = report.outcome("Rig", "default").unwrap();
    assert!(outcome.graph.is_none());
    let mismatch = outcome
        .diagnostics
        .iter()
        .find(|d| matches!(d.violation, Violation::TypeMismatch { .. }))
        .unwrap();
    assert_eq!(mismatch.locator.entity, "Broken.module");
}

#[test]
fn test_type_mismatch_through_untyped_module() {
    let relay = r#"
name: Relay.module
external_interfaces:
  input: [ { name: x } ]
  output: [ { name: y } ]
connections:
  - { from: input.x, to: output.y }
"#;
    let system = r#"
name: Rig.system
components:
  - { component: camera, entity: Camera.node }
  - { component: relay, entity: Relay.module }
  - { component: tracker, entity: Tracker.node }
connections:
  - { from: camera.output.image, to: relay.input.x }
  - { from: relay.output.y, to: tracker.input.objects }
"#;
    let report = compile_all(&[CAMERA, TRACKER, relay, system]);

    let outcome = report.outcome("Rig", "default").unwrap();
    assert!(outcome.graph.is_none());
    let mismatch = outcome
        .diagnostics
        .iter()
        .find(|d| matches!(d.violation, Violation::TypeMismatch { .. }))
        .unwrap();
    assert_eq!(mismatch.locator.entity, "Tracker.node");
    assert_eq!(mismatch.locator.instance.as_deref(), Some("/tracker"));
    assert_eq!(
        mismatch.violation,
        Violation::TypeMismatch {
            expected: "perception_msgs/msg/DetectedObjects".to_string(),
            found: "sensor_msgs/msg/Image".to_string(),
        }
    );
}

#[test]
fn test_two_producers_on_one_input() {
    let system = r#"
name: Dual.system
components:
  - { component: front, entity: Camera.node }
  - { component: rear, entity: Camera.node }
  - { component: perception_1, entity: Perception.module }
connections:
  - { from: front.output.image, to: perception_1.input.image }
  - { from: rear.output.image, to: perception_1.input.image }
"#;
    let report = compile_all(&[CAMERA, DETECTOR, PERCEPTION, system]);
    let outcome = report.outcome("Dual", "default").unwrap();
    assert!(outcome.graph.is_none());
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| matches!(d.violation, Violation::MultiplePublishersOnTopic { .. })));
}

#[test]
fn test_cycles_are_rejected() {
    let a = "name: A.module\ninstances: [ { instance: b, entity: B.module } ]";
    let b = "name: B.module\ninstances: [ { instance: a, entity: A.module } ]";
    let own = "name: Own.module\ninstances: [ { instance: me, entity: Own.module } ]";
    let system = r#"
name: Loop.system
components:
  - { component: loop, entity: A.module }
  - { component: own, entity: Own.module }
"#;
    let report = compile_all(&[a, b, own, system]);
    let outcome = report.outcome("Loop", "default").unwrap();
    assert!(outcome.graph.is_none());

    let cycles: Vec<&Vec<String>> = outcome
        .diagnostics
        .iter()
        .filter_map(|d| match d.violation {
            Violation::CyclicComposition { ref cycle } => Some(cycle),
            _ => None,
        })
        .collect();
    assert_eq!(cycles.len(), 2);
    assert!(cycles.contains(&&vec![
        "A.module".to_string(),
        "B.module".to_string(),
        "A.module".to_string()
    ]));
    assert!(cycles.contains(&&vec!["Own.module".to_string(), "Own.module".to_string()]));
}

#[test]
fn test_instance_path_collisions() {
    let nested = "name: Nest.module\ninstances: [ { instance: camera, entity: Camera.node } ]";
    let system = r#"
name: Clash.system
modes: [ default, simulation ]
components:
  - { component: camera, entity: Camera.node, namespace: /sensing }
  - { component: sensing, entity: Nest.module }
  - { component: sim_camera, entity: Nest.module, namespace: /other, mode: simulation }
"#;
    let report = compile_all(&[CAMERA, nested, system]);

    let default = report.outcome("Clash", "default").unwrap();
    assert!(default.graph.is_none());
    assert!(default.diagnostics.iter().any(|d| matches!(
        d.violation,
        Violation::DuplicateName { ref name, .. } if name == "/sensing/camera"
    )));

    // Components excluded by mode may share paths
    let exclusive = r#"
name: Exclusive.system
modes: [ real, simulation ]
components:
  - { component: camera, entity: Camera.node, namespace: /sensing, mode: real }
  - { component: sensing, entity: Nest.module, mode: simulation }
"#;
    let report = compile_all(&[CAMERA, nested, exclusive]);
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.graphs().count(), 2);
}

#[test]
fn test_dangling_connections_are_warnings() {
    let system = r#"
name: Partial.system
modes: [ default, debug ]
components:
  - { component: camera, entity: Camera.node }
  - { component: perception_1, entity: Perception.module, mode: debug }
connections:
  - { from: camera.output.image, to: perception_1.input.image }
"#;
    let report = compile_all(&[CAMERA, DETECTOR, PERCEPTION, system]);
    assert!(report.is_success(), "{}", report);
    let codes = codes(&report, "Partial", "default");
    assert!(codes.contains(&"dangling_connection"));
}

const LAYERED_MODULE: &str = r#"
name: Perception.module
instances:
  - { instance: detector, entity: Detector.node }
external_interfaces:
  input: [ { name: image } ]
  output: [ { name: objects } ]
  parameter: [ { name: detector } ]
parameters:
  - node: detector
    parameters: [ { name: score_threshold, value: 0.6 } ]
connections:
  - { from: input.image, to: detector.input.image }
  - { from: detector.output.objects, to: output.objects }
"#;

const TUNING: &str = r#"
name: Tuning.parameter_set
parameters:
  - node: /perception/perception_1/detector
    parameters: [ { name: score_threshold, value: 0.7 } ]
"#;

const TUNED: &str = r#"
name: Vehicle.system
components:
  - component: perception_1
    entity: Perception.module
    namespace: /perception
    parameter_set: Tuning.parameter_set
"#;

fn threshold(docs: &[&str], deployment: DeploymentOverrides) -> (ParameterValue, ValueSource) {
    let registry = registry(docs);
    let options = CompileOptions::new().with_deployment(deployment);
    let report = compile(&registry, &options).unwrap();
    assert!(report.is_success(), "{}", report);
    let graph = report.graphs().next().unwrap();
    let param = &graph
        .instance("/perception/perception_1/detector")
        .unwrap()
        .parameters["score_threshold"];
    (param.value.clone(), param.source.clone())
}

#[test]
fn test_precedence_chain() {
    let deployment = DeploymentOverrides::new().with_parameter(
        "/perception/perception_1/detector",
        "score_threshold",
        ParameterValue::Double(0.9),
    );

    let all = [DETECTOR, LAYERED_MODULE, TUNING, TUNED];
    assert_eq!(
        threshold(&all, deployment),
        (ParameterValue::Double(0.9), ValueSource::Deployment)
    );
    assert_eq!(
        threshold(&all, DeploymentOverrides::new()),
        (
            ParameterValue::Double(0.7),
            ValueSource::ParameterSet {
                parameter_set: "Tuning.parameter_set".to_string()
            }
        )
    );

    let untuned = TUNED.replace("    parameter_set: Tuning.parameter_set\n", "");
    assert_eq!(
        threshold(&[DETECTOR, LAYERED_MODULE, &untuned], DeploymentOverrides::new()),
        (
            ParameterValue::Double(0.6),
            ValueSource::Module {
                module: "Perception.module".to_string()
            }
        )
    );
    assert_eq!(
        threshold(&[DETECTOR, PERCEPTION, &untuned], DeploymentOverrides::new()),
        (ParameterValue::Double(0.5), ValueSource::NodeDefault)
    );
}

#[test]
fn test_missing_override_target_is_reported() {
    let stale = r#"
name: Tuning.parameter_set
parameters:
  - node: /perception/perception_2/detector
    parameters: [ { name: score_threshold, value: 0.7 } ]
"#;
    let report = compile_all(&[DETECTOR, PERCEPTION, stale, TUNED]);
    assert!(!report.is_success());
    assert!(codes(&report, "Vehicle", "default").contains(&"parameter_override_target_not_found"));
}
