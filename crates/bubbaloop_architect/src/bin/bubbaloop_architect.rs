//! Bubbaloop Architect CLI
//!
//! Usage:
//!   bubbaloop_architect architecture/
//!   bubbaloop_architect architecture/ -s Vehicle -m simulation -o build/deploy
//!   bubbaloop_architect architecture/ -p /perception/perception_1/detector:score_threshold:=0.7
//!   bubbaloop_architect architecture/ --validate

use bubbaloop_architect::{
    compile, load_definitions, write_artifacts, ArchitectArgs, EntityRegistry,
};
use std::path::Path;

fn main() {
    let args: ArchitectArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    let options = match args.compile_options() {
        Ok(options) => options,
        Err(e) => {
            log::error!("Invalid deployment overrides: {}", e);
            std::process::exit(1);
        }
    };

    // Load definitions
    let roots = args.roots();
    log::info!("Loading definitions from: {}", roots.join(", "));
    let loaded = match load_definitions(&roots) {
        Ok(loaded) => loaded,
        Err(e) => {
            log::error!("Failed to scan definitions: {}", e);
            std::process::exit(1);
        }
    };
    for error in &loaded.errors {
        log::error!("{}", error);
    }
    let load_failed = !loaded.is_ok();

    let registry = EntityRegistry::from_entities(loaded.entities.into_iter().map(|l| l.entity));
    log::info!("Registered {} definitions", registry.len());

    let report = match compile(&registry, &options) {
        Ok(report) => report,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    println!("{}", report);

    let mut failed = load_failed || !report.is_success();

    if let Some(ref out) = args.out {
        if args.validate {
            log::info!("Validate only, not writing artifacts to {}", out);
        } else {
            for graph in report.graphs() {
                match write_artifacts(graph, Path::new(out)) {
                    Ok(files) => log::info!(
                        "{} [{}]: wrote {} artifacts",
                        graph.system,
                        graph.mode,
                        files.len()
                    ),
                    Err(e) => {
                        log::error!("{}", e);
                        failed = true;
                    }
                }
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
