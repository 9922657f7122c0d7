//! Export command - build the app image from the launch directory

use crate::cli::args::ExportArgs;
use crate::config::Config;
use crate::error::{LifecycleError, LifecycleResult};
use crate::export::{ExportSettings, Exporter};
use crate::image::{ImageStore, OciLayoutStore};
use crate::metadata::BuildpackGroup;
use console::style;
use tracing::warn;

/// Execute the export command
pub fn execute(args: ExportArgs, config: &Config) -> LifecycleResult<()> {
    let paths = args.paths.resolve(&config.paths);
    let export = args.export_config(&config.export);
    let group = BuildpackGroup::from_file(&paths.group)?;

    let stack_store = OciLayoutStore::parse(&args.stack)?;
    let stack = stack_store
        .image()?
        .ok_or_else(|| LifecycleError::StackNotFound(stack_store.name()))?;

    let previous = match &args.previous {
        Some(reference) => {
            let store = OciLayoutStore::parse(reference)?;
            let image = store.image()?;
            if image.is_none() {
                warn!("Previous image {} not found", store.name());
            }
            image
        }
        None => None,
    };

    let settings = ExportSettings {
        launch_dir: paths.launch_dir,
        app_dir: paths.app_dir,
        layer_prefix: export.layer_prefix,
        launcher: export.launcher,
        process_file: export.process_file,
    };
    let target = OciLayoutStore::parse(&args.image)?;
    let digest = Exporter::new(&group, settings).export_to(&stack, previous.as_ref(), &target)?;

    println!("{} {} {}", style("[OK]").green(), target.name(), style(digest).dim());
    Ok(())
}
