use super::{cancel_on_ctrl_c, parse_requirements, resolve, runtime};
use miette::{IntoDiagnostic, Result};
use modfetch_core::module::{DownloadLocation, InstallationPlan, Lockfile};
use modfetch_core::Config;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn run(config: &Config, specs: &[String], lockfile: Option<&Path>, json: bool) -> Result<()> {
    let requirements = parse_requirements(specs)?;
    let token = CancellationToken::new();

    let plan = runtime()?.block_on(async {
        cancel_on_ctrl_c(&token);
        resolve(config, &requirements, &token).await
    })?;

    if let Some(path) = lockfile {
        Lockfile::from_plan(&plan).write_to(path).into_diagnostic()?;
        info!(path = %path.display(), "Wrote lockfile");
    }

    print_plan(&plan, json)
}

pub fn print_plan(plan: &InstallationPlan, json: bool) -> Result<()> {
    if json {
        let modules: Vec<_> = plan.iter().collect();
        let result = serde_json::json!({
            "count": modules.len(),
            "modules": modules,
        });
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
        return Ok(());
    }

    if plan.is_empty() {
        println!("Nothing to install; all requirements are satisfied locally.");
        return Ok(());
    }
    for module in plan.iter() {
        let from = match module.location() {
            DownloadLocation::Remote(url) => url.clone(),
            DownloadLocation::Local(dir) => dir.display().to_string(),
        };
        println!("{module}  {from}");
    }
    Ok(())
}
