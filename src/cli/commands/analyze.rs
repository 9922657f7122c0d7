//! Analyze command - reconcile cached layers with the previous image

use crate::cache::{AnalysisReport, Analyzer, CacheState};
use crate::cli::args::{AnalyzeArgs, OutputFormat};
use crate::config::Config;
use crate::error::LifecycleResult;
use crate::image::{ImageStore, OciLayoutStore};
use crate::metadata::{AppImageMetadata, BuildpackGroup};
use console::style;
use tracing::debug;

/// Execute the analyze command
pub fn execute(args: AnalyzeArgs, config: &Config) -> LifecycleResult<()> {
    let paths = args.paths.resolve(&config.paths);
    let group = BuildpackGroup::from_file(&paths.group)?;
    let analyzer = Analyzer::new(&group, &paths.launch_dir).with_app_dir(&paths.app_dir);

    let report = match &args.metadata {
        Some(path) => {
            debug!("Reading previous metadata from {}", path.display());
            analyzer.analyze_metadata(&AppImageMetadata::from_file(path)?)?
        }
        None => {
            let store = OciLayoutStore::parse(&args.image)?;
            let previous = store.image()?;
            analyzer.analyze(previous.as_ref())?
        }
    };

    match args.format {
        OutputFormat::Table => print_report_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_report_table(report: &AnalysisReport) {
    if let Some(reason) = report.skipped {
        println!("Skipped: {}, nothing to analyze.", reason);
        return;
    }

    for buildpack in &report.removed_buildpacks {
        println!("{} {}", style("removed").red(), buildpack);
    }

    if report.layers.is_empty() {
        println!("No cached layers.");
        return;
    }

    println!("{:<40} {:<26} {:<10}", "LAYER", "STATE", "ACTION");
    println!("{}", "-".repeat(76));

    for outcome in &report.layers {
        let state = match outcome.state {
            CacheState::UpToDate => style(outcome.state.to_string()).green(),
            CacheState::StaleBuildNoMetadata => style(outcome.state.to_string()).dim(),
            CacheState::NoCacheAvailable => style(outcome.state.to_string()).dim(),
            _ => style(outcome.state.to_string()).yellow(),
        };
        let action = match (outcome.removed, outcome.restored) {
            (true, true) => "replaced",
            (true, false) => "removed",
            (false, true) => "restored",
            (false, false) => "kept",
        };

        println!(
            "{:<40} {:<26} {:<10}",
            format!("{}/{}", outcome.buildpack, outcome.layer),
            state,
            action
        );
    }
}
