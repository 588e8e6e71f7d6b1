//! Command-line interface for bubbaloop-architect

use crate::compile::CompileOptions;
use crate::config::{CliOverride, DeploymentOverrides, OverrideError};
use crate::model::ParameterValue;
use argh::FromArgs;

/// Compile node, module and system definitions into deployment graphs
#[derive(FromArgs, Debug)]
pub struct ArchitectArgs {
    /// definition files or directories to scan (default: current directory)
    #[argh(positional)]
    pub roots: Vec<String>,

    /// system to compile, without the .system suffix (repeatable, default: all)
    #[argh(option, short = 's')]
    pub system: Vec<String>,

    /// mode to compile (repeatable, default: every declared mode)
    #[argh(option, short = 'm')]
    pub mode: Vec<String>,

    /// deployment override file (parameter set layout plus optional args)
    #[argh(option)]
    pub overrides: Option<String>,

    /// override a parameter (format: /instance/path:key:=value)
    #[argh(option, short = 'p', from_str_fn(parse_override))]
    pub param: Vec<CliOverride>,

    /// override a parameter file (format: /instance/path:key:=file)
    #[argh(option, from_str_fn(parse_override))]
    pub param_file: Vec<CliOverride>,

    /// substitution arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// write deployment artifacts below this directory
    #[argh(option, short = 'o')]
    pub out: Option<String>,

    /// compile and report without writing anything
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, ":=").collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Parse a per-instance override in format "/instance/path:key:=value"
fn parse_override(s: &str) -> Result<CliOverride, String> {
    CliOverride::parse(s).map_err(|e| e.to_string())
}

impl ArchitectArgs {
    /// Definition roots, defaulting to the current directory
    pub fn roots(&self) -> Vec<String> {
        if self.roots.is_empty() {
            vec![".".to_string()]
        } else {
            self.roots.clone()
        }
    }

    /// The deployment layer: the override file, then command-line values on top
    pub fn deployment(&self) -> Result<DeploymentOverrides, OverrideError> {
        let mut deployment = match self.overrides {
            Some(ref path) => DeploymentOverrides::from_file(path)?,
            None => DeploymentOverrides::new(),
        };
        for (key, value) in &self.arg {
            deployment = deployment.with_arg(key.clone(), value.clone());
        }
        for o in &self.param {
            deployment = deployment.with_parameter(
                o.node.clone(),
                o.key.clone(),
                ParameterValue::from(o.value.as_str()),
            );
        }
        for o in &self.param_file {
            deployment =
                deployment.with_parameter_file(o.node.clone(), o.key.clone(), o.value.clone());
        }
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn compile_options(&self) -> Result<CompileOptions, OverrideError> {
        Ok(CompileOptions {
            systems: self.system.clone(),
            modes: self.mode.clone(),
            deployment: self.deployment()?,
        })
    }
}
