use super::{cancel_on_ctrl_c, parse_requirements, resolve, runtime};
use miette::{IntoDiagnostic, Result};
use modfetch_core::module::{InstallOptions, Installer, Lockfile, RegistryClient};
use modfetch_core::Config;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn run(config: &Config, specs: &[String], lockfile: Option<&Path>, json: bool) -> Result<()> {
    let requirements = match lockfile {
        Some(path) => Lockfile::read_from(path)
            .and_then(|lock| lock.requirements())
            .into_diagnostic()?,
        None => parse_requirements(specs)?,
    };
    let options = InstallOptions::from_config(config).into_diagnostic()?;
    let token = CancellationToken::new();

    let installed = runtime()?.block_on(async {
        cancel_on_ctrl_c(&token);
        let plan = resolve(config, &requirements, &token).await?;
        if plan.is_empty() {
            info!("All requirements are satisfied locally");
            return Ok(Vec::new());
        }

        let registry = RegistryClient::shared(config.request_timeout()).into_diagnostic()?;
        let installer = Installer::new(registry, options)
            .into_diagnostic()?
            .with_cancellation(token.clone());
        installer.install(&plan).await.into_diagnostic()
    })?;

    if json {
        let result = serde_json::json!({
            "count": installed.len(),
            "installed": installed,
        });
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
        return Ok(());
    }

    if installed.is_empty() {
        println!("Nothing to install; all requirements are satisfied locally.");
    }
    for module in &installed {
        let path = module
            .install_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("Installed {module}  {path}");
    }
    Ok(())
}
