pub mod install;
pub mod plan;
pub mod version;

use miette::{IntoDiagnostic, Result};
use modfetch_core::module::{InstallationPlan, RegistryClient, ResolveOptions, Resolver};
use modfetch_core::{Config, Requirement};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Parse requirement shorthand arguments.
pub fn parse_requirements(specs: &[String]) -> Result<Vec<Requirement>> {
    specs
        .iter()
        .map(|spec| Requirement::parse(spec).into_diagnostic())
        .collect()
}

/// Multi-threaded runtime for one command.
pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}

/// Cancel `token` on Ctrl-C. Must be called inside the runtime.
pub fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Resolve `requirements` with the shared registry session.
pub async fn resolve(
    config: &Config,
    requirements: &[Requirement],
    token: &CancellationToken,
) -> Result<InstallationPlan> {
    let registry = RegistryClient::shared(config.request_timeout()).into_diagnostic()?;
    let mut resolver = Resolver::new(registry, ResolveOptions::from_config(config))
        .with_cancellation(token.clone());
    resolver.resolve(requirements).await.into_diagnostic()
}
