//! hostaudit: run the built-in probes against this host and publish the report.
//!
//! Usage:
//!   cargo run -p hostaudit-cli -- [--probes host_info,security] [--format json] [--no-obfuscate]
//!
//! Exit codes: 0 when the report was published (failed probes included), 1 when
//! the run was aborted or publishing failed, 2 on configuration errors.

mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use hostaudit_core::{
    AuditConfig, CancelFlag, Obfuscator, Pipeline, Probe, ProbeState, Publisher, Redactor, ReportRenderer,
};
use hostaudit_probes::standard_registry;
use tracing::{error, info, warn};

use crate::cli::{CliArgs, USAGE};

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return EXIT_CONFIG;
        }
    };
    if args.help {
        println!("{}", USAGE);
        return 0;
    }

    let loaded = match &args.config {
        Some(path) => AuditConfig::load_from(path),
        None => AuditConfig::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[hostaudit] {}", e);
            return EXIT_CONFIG;
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("[hostaudit] {}", e);
        return EXIT_CONFIG;
    }

    match args.write_init_config(&config) {
        Ok(Some(path)) => {
            println!("Configuration written to {}", path.display());
            return 0;
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("[hostaudit] {}", e);
            return EXIT_CONFIG;
        }
    }

    let registry = standard_registry(&config);
    if args.list_probes {
        for (name, description) in registry.list() {
            println!("{:<12} {}", name, description);
        }
        return 0;
    }

    let probes: Vec<Arc<dyn Probe>> = match &config.probes {
        Some(names) => match registry.select(names) {
            Ok(probes) => probes,
            Err(e) => {
                eprintln!("[hostaudit] {}", e);
                return EXIT_CONFIG;
            }
        },
        None => registry.probes().to_vec(),
    };

    let host_id = config.host_id();
    let log_path = config.log_path();
    let _guard = match logging::init(&log_path) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("[hostaudit] cannot open log file {}: {}", log_path.display(), e);
            return EXIT_CONFIG;
        }
    };

    let mut pipeline = Pipeline::new(probes, &log_path)
        .with_default_timeout(Duration::from_secs(config.timeouts.probe_secs));
    for (probe, secs) in &config.timeouts.overrides {
        pipeline = pipeline.with_timeout(probe.clone(), Duration::from_secs(*secs));
    }
    watch_ctrl_c(pipeline.cancel_flag());

    info!(host = %host_id, offset = config.initial_offset, log = %log_path.display(), "Starting audit");
    let outcome = pipeline.run(&host_id, config.initial_offset).await;
    for probe in &outcome.probes {
        println!(
            "{:<12} {:<10} items={:<3} {}",
            probe.probe,
            format!("{:?}", probe.state).to_lowercase(),
            probe.items,
            probe.reason.as_deref().unwrap_or("")
        );
    }
    info!(
        succeeded = outcome.count(ProbeState::Succeeded),
        failed = outcome.count(ProbeState::Failed),
        items = outcome.report.len(),
        cancelled = outcome.cancelled,
        "Audit finished"
    );

    let publisher = match build_publisher(&config) {
        Ok(publisher) => publisher,
        Err(e) => {
            error!(reason = %e, "Cannot prepare report publishing");
            return EXIT_FAILURE;
        }
    };
    let publication = publisher.publish(&outcome.report, &host_id);
    for (format, path) in &publication.artifacts {
        println!("{} report: {}", format, path.display());
    }
    for e in &publication.errors {
        error!(reason = %e, "Publishing failed");
    }

    if let Some(fatal) = &outcome.fatal {
        error!(reason = %fatal, "Run aborted");
        return EXIT_FAILURE;
    }
    if !publication.is_ok() {
        return EXIT_FAILURE;
    }
    0
}

fn build_publisher(config: &AuditConfig) -> Result<Publisher, Box<dyn std::error::Error + Send + Sync>> {
    let renderer = ReportRenderer::new()?;
    let mut publisher = Publisher::new(Box::new(renderer), &config.report_dir).with_formats(config.formats.clone());
    if config.obfuscate {
        let redactor = match &config.protected_terms_path {
            Some(path) => Redactor::with_terms_file(path)?,
            None => Redactor::new()?,
        };
        info!(terms = redactor.terms().len(), "Obfuscation enabled");
        publisher = publisher.with_obfuscator(Box::new(redactor) as Box<dyn Obfuscator>);
    } else {
        warn!("Obfuscation disabled: identity fields are published as collected");
    }
    Ok(publisher)
}

/// Cancel at the next probe boundary on Ctrl-C.
fn watch_ctrl_c(flag: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current probe");
            flag.cancel();
        }
    });
}
