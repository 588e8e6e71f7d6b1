//! Parameter overlay
//!
//! Effective parameters are built from an explicit, ordered list of layers:
//!
//! 1. node defaults
//! 2. module defaults, innermost enclosing module first (outer modules win)
//! 3. the component's parameter sets, in declared order
//! 4. deployment overrides
//!
//! A later layer replaces the whole value of a key. `$(arg ...)` and
//! `$(env ...)` in string values and file paths are substituted last.

use super::flatten::{FlatInstance, FlatSystem};
use super::registry::EntityRegistry;
use super::resolver::ResolvedSystem;
use super::validator::relative_path;
use crate::config::{
    DeploymentOverrides, SubstitutionContext, SubstitutionError, DEPLOYMENT_ENTITY,
};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use crate::model::{normalize_namespace, NodeOverride, ParameterType, ParameterValue};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

/// Which layer set an effective value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum ValueSource {
    NodeDefault,
    Module { module: String },
    ParameterSet { parameter_set: String },
    Deployment,
}

impl ValueSource {
    /// Entity to blame for a bad value, given the node the value belongs to
    fn entity(&self, node: &str) -> String {
        match self {
            ValueSource::NodeDefault => node.to_string(),
            ValueSource::Module { module } => module.clone(),
            ValueSource::ParameterSet { parameter_set } => parameter_set.clone(),
            ValueSource::Deployment => DEPLOYMENT_ENTITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveParameter {
    #[serde(rename = "type")]
    pub ty: ParameterType,
    pub value: ParameterValue,
    pub source: ValueSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub source: ValueSource,
}

/// Effective configuration of one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceParameters {
    pub parameters: IndexMap<String, EffectiveParameter>,
    pub parameter_files: IndexMap<String, EffectiveFile>,
}

/// Effective parameters for every instance of a flattened system, indexed
/// like [`FlatSystem::components`] and their instance lists
#[derive(Debug, Clone, Default)]
pub struct SystemOverlay {
    pub components: Vec<Vec<InstanceParameters>>,
}

impl SystemOverlay {
    pub fn get(&self, component: usize, instance: usize) -> Option<&InstanceParameters> {
        self.components.get(component)?.get(instance)
    }
}

/// One override layer entry applied to an instance
struct Layer<'d> {
    entity: String,
    field: String,
    source: ValueSource,
    overrides: &'d NodeOverride,
}

/// Compute effective parameters for every instance of a system
pub fn overlay_system(
    registry: &EntityRegistry,
    system: &ResolvedSystem,
    flat: &FlatSystem,
    deployment: &DeploymentOverrides,
    context: &SubstitutionContext,
) -> (SystemOverlay, Vec<Diagnostic>) {
    let mut overlay = SystemOverlay::default();
    let mut diagnostics = Vec::new();

    for (index, component) in flat.components.iter().enumerate() {
        let Some(component) = component else {
            overlay.components.push(Vec::new());
            continue;
        };
        let resolved = &system.components[index];
        let mut scoped = Vec::new();

        let paths: HashSet<&str> = component.instances.iter().map(|i| i.path.as_str()).collect();
        for &set_id in &resolved.parameter_sets {
            let set = registry.parameter_set(set_id);
            for (i, o) in set.parameters.iter().enumerate() {
                if !paths.contains(normalize_namespace(&o.node).as_str()) {
                    scoped.push(Diagnostic::new(
                        Violation::ParameterOverrideTargetNotFound {
                            target: o.node.clone(),
                        },
                        Locator::new(set.name.to_string(), format!("parameters[{}].node", i)),
                    ));
                }
            }
        }

        let instances = component
            .instances
            .iter()
            .map(|instance| {
                let mut layers = Vec::new();

                for ancestor in &instance.ancestry {
                    let module = registry.module(ancestor.module);
                    for (i, o) in module.parameters.iter().enumerate() {
                        if relative_path(&o.node) == ancestor.relative {
                            layers.push(Layer {
                                entity: module.name.to_string(),
                                field: format!("parameters[{}]", i),
                                source: ValueSource::Module {
                                    module: module.name.to_string(),
                                },
                                overrides: o,
                            });
                        }
                    }
                }

                for &set_id in &resolved.parameter_sets {
                    let set = registry.parameter_set(set_id);
                    for (i, o) in set.parameters.iter().enumerate() {
                        if normalize_namespace(&o.node) == instance.path {
                            layers.push(Layer {
                                entity: set.name.to_string(),
                                field: format!("parameters[{}]", i),
                                source: ValueSource::ParameterSet {
                                    parameter_set: set.name.to_string(),
                                },
                                overrides: o,
                            });
                        }
                    }
                }

                for (i, o) in deployment.parameters.iter().enumerate() {
                    if normalize_namespace(&o.node) == instance.path {
                        layers.push(Layer {
                            entity: DEPLOYMENT_ENTITY.to_string(),
                            field: format!("parameters[{}]", i),
                            source: ValueSource::Deployment,
                            overrides: o,
                        });
                    }
                }

                overlay_instance(registry, instance, &layers, context, &mut scoped)
            })
            .collect();

        overlay.components.push(instances);
        diagnostics.extend(scoped.into_iter().map(|d| d.scoped([component.name.clone()])));
    }

    (overlay, diagnostics)
}

/// Apply node defaults, then `layers` in order, then substitution
fn overlay_instance(
    registry: &EntityRegistry,
    instance: &FlatInstance,
    layers: &[Layer],
    context: &SubstitutionContext,
    diagnostics: &mut Vec<Diagnostic>,
) -> InstanceParameters {
    let node = registry.node(instance.node);
    let mut effective = InstanceParameters::default();

    for param in &node.parameters {
        // Defaults that do not fit their type are reported by the node check
        if let Some(value) = param.default.coerce(param.ty) {
            effective.parameters.insert(
                param.name.clone(),
                EffectiveParameter {
                    ty: param.ty,
                    value,
                    source: ValueSource::NodeDefault,
                },
            );
        }
    }
    for file in &node.parameter_files {
        effective.parameter_files.insert(
            file.name.clone(),
            EffectiveFile {
                path: file.default.clone(),
                schema: file.schema.clone(),
                source: ValueSource::NodeDefault,
            },
        );
    }

    for layer in layers {
        for (j, p) in layer.overrides.parameters.iter().enumerate() {
            match effective.parameters.get_mut(&p.name) {
                Some(existing) => match p.value.coerce(existing.ty) {
                    Some(value) => {
                        existing.value = value;
                        existing.source = layer.source.clone();
                    }
                    None => diagnostics.push(
                        Diagnostic::new(
                            Violation::TypeMismatch {
                                expected: existing.ty.to_string(),
                                found: p.value.inferred_type().to_string(),
                            },
                            Locator::new(&layer.entity, format!("{}.parameters[{}]", layer.field, j)),
                        )
                        .at(instance.path.clone()),
                    ),
                },
                None => {
                    let ty = p.ty.unwrap_or_else(|| p.value.inferred_type());
                    if let Some(value) = p.value.coerce(ty) {
                        effective.parameters.insert(
                            p.name.clone(),
                            EffectiveParameter {
                                ty,
                                value,
                                source: layer.source.clone(),
                            },
                        );
                    }
                }
            }
        }

        for (name, path) in &layer.overrides.parameter_files {
            match effective.parameter_files.get_mut(name) {
                Some(existing) => {
                    existing.path = path.clone();
                    existing.source = layer.source.clone();
                }
                None => {
                    effective.parameter_files.insert(
                        name.clone(),
                        EffectiveFile {
                            path: path.clone(),
                            schema: None,
                            source: layer.source.clone(),
                        },
                    );
                }
            }
        }
    }

    let node_name = node.name.to_string();
    let mut report = |error: SubstitutionError, source: &ValueSource, field: String| {
        let violation = match error {
            SubstitutionError::UndefinedArg(name) => Violation::ReferenceNotFound {
                what: "argument".to_string(),
                name,
            },
            SubstitutionError::UndefinedEnv(name) => Violation::ReferenceNotFound {
                what: "environment variable".to_string(),
                name,
            },
            other => Violation::InvalidDefinition {
                reason: other.to_string(),
            },
        };
        diagnostics.push(
            Diagnostic::new(violation, Locator::new(source.entity(&node_name), field))
                .at(instance.path.clone()),
        );
    };

    for (key, param) in effective.parameters.iter_mut() {
        if let ParameterValue::String(ref text) = param.value {
            if SubstitutionContext::has_patterns(text) {
                match context.substitute(text) {
                    Ok(value) => param.value = ParameterValue::String(value),
                    Err(e) => report(e, &param.source, format!("parameters.{}", key)),
                }
            }
        }
    }
    for (key, file) in effective.parameter_files.iter_mut() {
        if SubstitutionContext::has_patterns(&file.path) {
            match context.substitute(&file.path) {
                Ok(path) => file.path = path,
                Err(e) => report(e, &file.source, format!("parameter_files.{}", key)),
            }
        }
    }

    log::debug!(
        "{}: {} parameters, {} parameter files after {} override layers",
        instance.path,
        effective.parameters.len(),
        effective.parameter_files.len(),
        layers.len()
    );
    effective
}

/// Deployment overrides whose target matches no instance of any compiled system
pub fn unmatched_deployment_targets(
    deployment: &DeploymentOverrides,
    paths: &HashSet<String>,
) -> Vec<Diagnostic> {
    deployment
        .parameters
        .iter()
        .enumerate()
        .filter(|(_, o)| !paths.contains(&normalize_namespace(&o.node)))
        .map(|(i, o)| {
            Diagnostic::new(
                Violation::ParameterOverrideTargetNotFound {
                    target: o.node.clone(),
                },
                Locator::new(DEPLOYMENT_ENTITY, format!("parameters[{}].node", i)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::flatten::flatten_system;
    use crate::compile::resolver::Resolver;
    use crate::model::{Entity, EntityKind};

    const DOCS: &[(EntityKind, &str)] = &[
        (
            EntityKind::Node,
            r#"
name: Detector.node
launch: { package: perception_pkg, plugin: perception::Detector }
parameters:
  - { name: threshold, type: double, default: 0.1 }
  - { name: label, type: string, default: "$(arg vehicle)_detector" }
  - { name: enabled, type: bool, default: true }
parameter_files:
  - { name: model, default: "$(find-pkg-share perception_pkg)/model.yaml" }
"#,
        ),
        (
            EntityKind::Module,
            r#"
name: Inner.module
instances: [ { instance: detector, entity: Detector.node } ]
parameters:
  - node: detector
    parameters: [ { name: threshold, value: 0.2 } ]
"#,
        ),
        (
            EntityKind::Module,
            r#"
name: Outer.module
instances: [ { instance: inner, entity: Inner.module } ]
parameters:
  - node: inner/detector
    parameters: [ { name: threshold, value: 0.3 } ]
"#,
        ),
        (
            EntityKind::ParameterSet,
            r#"
name: Tuning.parameter_set
parameters:
  - node: /perception/outer/inner/detector
    parameters:
      - { name: threshold, value: 1 }
      - { name: enabled, value: 3 }
    parameter_files: { model: /opt/model.yaml }
  - node: /perception/outer/missing
    parameters: [ { name: threshold, value: 0.5 } ]
"#,
        ),
        (
            EntityKind::System,
            r#"
name: Vehicle.system
components:
  - component: outer
    entity: Outer.module
    namespace: perception
    parameter_set: Tuning.parameter_set
"#,
        ),
    ];

    fn run(deployment: &DeploymentOverrides) -> (InstanceParameters, Vec<Diagnostic>) {
        let registry = EntityRegistry::from_entities(
            DOCS.iter()
                .map(|(kind, yaml)| Entity::from_yaml(*kind, yaml).unwrap()),
        );
        let mut resolver = Resolver::new(&registry);
        let system = resolver.resolve_system(registry.find_system("Vehicle").unwrap());
        let flat = flatten_system(&registry, &system);
        let context = SubstitutionContext::new()
            .with_args(deployment.arg_strings())
            .isolated();
        let (overlay, diagnostics) =
            overlay_system(&registry, &system, &flat, deployment, &context);
        (overlay.get(0, 0).cloned().unwrap(), diagnostics)
    }

    #[test]
    fn test_layer_precedence() {
        let deployment = DeploymentOverrides::new()
            .with_arg("vehicle", "demo")
            .with_parameter(
                "/perception/outer/inner/detector",
                "threshold",
                ParameterValue::Double(9.5),
            );
        let (params, _) = run(&deployment);
        let threshold = &params.parameters["threshold"];
        assert_eq!(threshold.value, ParameterValue::Double(9.5));
        assert_eq!(threshold.source, ValueSource::Deployment);

        // Without the deployment layer the parameter set wins, widened to double
        let (params, _) = run(&DeploymentOverrides::new().with_arg("vehicle", "demo"));
        let threshold = &params.parameters["threshold"];
        assert_eq!(threshold.value, ParameterValue::Double(1.0));
        assert_eq!(
            threshold.source,
            ValueSource::ParameterSet {
                parameter_set: "Tuning.parameter_set".to_string()
            }
        );
        assert_eq!(params.parameter_files["model"].path, "/opt/model.yaml");
    }

    #[test]
    fn test_outer_module_shadows_inner() {
        let registry = EntityRegistry::from_entities(
            DOCS.iter()
                .filter(|(kind, _)| *kind != EntityKind::ParameterSet)
                .map(|(kind, yaml)| Entity::from_yaml(*kind, yaml).unwrap()),
        );
        let mut resolver = Resolver::new(&registry);
        let system = resolver.resolve_system(registry.find_system("Vehicle").unwrap());
        let flat = flatten_system(&registry, &system);
        let context = SubstitutionContext::new().with_arg("vehicle", "demo");
        let (overlay, _) = overlay_system(
            &registry,
            &system,
            &flat,
            &DeploymentOverrides::new(),
            &context,
        );
        let threshold = &overlay.get(0, 0).unwrap().parameters["threshold"];
        assert_eq!(threshold.value, ParameterValue::Double(0.3));
        assert_eq!(
            threshold.source,
            ValueSource::Module {
                module: "Outer.module".to_string()
            }
        );
    }

    #[test]
    fn test_type_mismatch_and_missing_target() {
        let (params, diagnostics) = run(&DeploymentOverrides::new().with_arg("vehicle", "demo"));
        assert_eq!(params.parameters["enabled"].value, ParameterValue::Bool(true));

        let kinds: Vec<&str> = diagnostics.iter().map(|d| d.violation.code()).collect();
        assert_eq!(kinds, vec!["parameter_override_target_not_found", "type_mismatch"]);
        assert!(diagnostics.iter().all(|d| d.scope == vec!["outer".to_string()]));
        assert_eq!(
            diagnostics[1].locator.instance.as_deref(),
            Some("/perception/outer/inner/detector")
        );
    }

    #[test]
    fn test_substitution() {
        let (params, diagnostics) = run(&DeploymentOverrides::new().with_arg("vehicle", "demo"));
        assert_eq!(
            params.parameters["label"].value,
            ParameterValue::String("demo_detector".to_string())
        );
        assert!(diagnostics
            .iter()
            .all(|d| !matches!(d.violation, Violation::ReferenceNotFound { .. })));

        let (_, diagnostics) = run(&DeploymentOverrides::new());
        let missing = diagnostics
            .iter()
            .find(|d| matches!(d.violation, Violation::ReferenceNotFound { .. }))
            .unwrap();
        assert_eq!(missing.locator.entity, "Detector.node");
        assert_eq!(missing.locator.field, "parameters.label");
    }

    #[test]
    fn test_unmatched_deployment_targets() {
        let deployment = DeploymentOverrides::new()
            .with_parameter("/a/b", "x", ParameterValue::Int(1))
            .with_parameter("/c", "x", ParameterValue::Int(1));
        let paths: HashSet<String> = ["/a/b".to_string()].into_iter().collect();
        let diagnostics = unmatched_deployment_targets(&deployment, &paths);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].locator.field, "parameters[1].node");
    }
}
