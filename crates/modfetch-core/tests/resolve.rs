//! Resolver integration tests against an in-memory registry.

mod common;

use common::{install_local, MockRegistry};
use modfetch_core::module::{codes, RegistryClient, ResolveOptions, ResolveState, Resolver};
use modfetch_core::Requirement;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn options(registry: &MockRegistry, search_paths: Vec<PathBuf>) -> ResolveOptions {
    ResolveOptions {
        source: registry.source(),
        search_paths,
        update: false,
        strict: false,
        prerelease: false,
        poll_interval: Duration::from_millis(20),
    }
}

fn resolver(options: ResolveOptions) -> Resolver {
    Resolver::new(RegistryClient::new(Duration::from_secs(5)).unwrap(), options)
}

fn reqs(specs: &[&str]) -> Vec<Requirement> {
    specs.iter().map(|s| Requirement::parse(s).unwrap()).collect()
}

fn planned(plan: &modfetch_core::InstallationPlan) -> Vec<String> {
    plan.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn test_resolves_transitive_dependencies() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[]), ("2.0.0", &[("Beta", "[1.0.0, )")])]);
    registry.publish_module("Beta", &[("1.0.0", &[]), ("1.4.0", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@2.0.0", "Beta@1.4.0"]);
    assert_eq!(resolver.state(), ResolveState::Done);
}

#[tokio::test]
async fn test_local_install_satisfies_dependency() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("2.0.0", &[("Beta", "1.0.0")])]);
    registry.publish_module("Beta", &[("1.5.0", &[]), ("1.9.0", &[])]);

    let local = TempDir::new().unwrap();
    install_local(local.path(), "Beta", "1.5.0");

    let mut resolver = resolver(options(&registry, vec![local.path().to_path_buf()]));
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@2.0.0"]);
    assert_eq!(registry.hits(&MockRegistry::registration_path("Beta")), 0);
}

#[tokio::test]
async fn test_duplicate_roots_merge_into_one_module() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[]), ("2.0.0", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver
        .resolve(&reqs(&["Alpha=1.0.0", "Alpha>=1.0.0"]))
        .await
        .unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.0.0"]);
    assert_eq!(registry.hits(&MockRegistry::registration_path("Alpha")), 1);
}

#[tokio::test]
async fn test_disjoint_roots_fail_without_network() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let err = resolver
        .resolve(&reqs(&["Alpha<1.0.0", "Alpha>=2.0.0"]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::MOD_NOT_FOUND);
    assert_eq!(resolver.state(), ResolveState::Failed);
    assert_eq!(registry.total_hits(), 0);
}

#[tokio::test]
async fn test_unknown_module_is_not_found() {
    let registry = MockRegistry::start().await;

    let mut resolver = resolver(options(&registry, Vec::new()));
    let err = resolver.resolve(&reqs(&["Missing"])).await.unwrap_err();

    assert_eq!(err.code(), codes::MOD_NOT_FOUND);
    assert!(err.message().contains("Missing"));
}

#[tokio::test]
async fn test_paged_registration_fetches_overlapping_page() {
    let registry = MockRegistry::start().await;
    let old = registry.page_ref(
        "Alpha",
        vec![
            registry.leaf("Alpha", "1.0.0", &[]),
            registry.leaf("Alpha", "1.9.0", &[]),
        ],
    );
    let older = registry.page_ref("Alpha", vec![registry.leaf("Alpha", "0.1.0", &[])]);
    let current = registry.inline_page("Alpha", vec![registry.leaf("Alpha", "2.0.0", &[])]);
    registry.publish_registration("Alpha", vec![older, old, current]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha<2.0.0"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.9.0"]);
    assert_eq!(registry.hits("/reg/alpha/page/1.0.0/1.9.0.json"), 1);
    assert_eq!(registry.hits("/reg/alpha/page/0.1.0/0.1.0.json"), 0);
}

#[tokio::test]
async fn test_inlined_page_avoids_page_fetch() {
    let registry = MockRegistry::start().await;
    let old = registry.page_ref("Alpha", vec![registry.leaf("Alpha", "1.0.0", &[])]);
    let current = registry.inline_page("Alpha", vec![registry.leaf("Alpha", "2.0.0", &[])]);
    registry.publish_registration("Alpha", vec![old, current]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@2.0.0"]);
    assert_eq!(registry.hits("/reg/alpha/page/1.0.0/1.0.0.json"), 0);
}

#[tokio::test]
async fn test_unlisted_version_needs_exact_pin() {
    let registry = MockRegistry::start().await;
    let leaves = vec![
        registry.leaf("Alpha", "1.0.0", &[]),
        MockRegistry::unlisted(registry.leaf("Alpha", "1.1.0", &[])),
    ];
    let page = registry.inline_page("Alpha", leaves);
    registry.publish_registration("Alpha", vec![page]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();
    assert_eq!(planned(&plan), vec!["Alpha@1.0.0"]);

    let plan = resolver.resolve(&reqs(&["Alpha@1.1.0"])).await.unwrap();
    assert_eq!(planned(&plan), vec!["Alpha@1.1.0"]);
}

#[tokio::test]
async fn test_prerelease_needs_opt_in() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[]), ("1.1.0-beta1", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();
    assert_eq!(planned(&plan), vec!["Alpha@1.0.0"]);

    let plan = resolver.resolve(&reqs(&["!Alpha"])).await.unwrap();
    assert_eq!(planned(&plan), vec!["Alpha@1.1.0-beta1"]);
}

#[tokio::test]
async fn test_incompatible_dependencies_are_not_found() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Gamma", "[1.0.0]")])]);
    registry.publish_module("Beta", &[("1.0.0", &[("Gamma", "[2.0.0]")])]);
    registry.publish_module("Gamma", &[("1.0.0", &[]), ("2.0.0", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let err = resolver.resolve(&reqs(&["Alpha", "Beta"])).await.unwrap_err();

    assert_eq!(err.code(), codes::MOD_NOT_FOUND);
    assert!(err.message().contains("Gamma"));
    assert_eq!(resolver.state(), ResolveState::Failed);
}

#[tokio::test]
async fn test_dependency_narrows_root_of_same_name() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Beta", "[1.0.0]")])]);
    registry.publish_module("Beta", &[("1.0.0", &[]), ("2.0.0", &[])]);

    let client = RegistryClient::new(Duration::from_secs(5)).unwrap();
    for roots in [["Alpha", "Beta"], ["Beta", "Alpha"]] {
        let mut resolver = Resolver::new(client.clone(), options(&registry, Vec::new()));
        let plan = resolver.resolve(&reqs(&roots)).await.unwrap();
        assert_eq!(planned(&plan), vec!["Alpha@1.0.0", "Beta@1.0.0"]);
    }
    assert_eq!(registry.hits(&MockRegistry::registration_path("Beta")), 1);
}

#[tokio::test]
async fn test_narrowed_requirement_replans_resolved_module() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Beta", "[1.0.0]")])]);
    registry.publish_module("Beta", &[("1.0.0", &[]), ("2.0.0", &[("Gamma", "1.0.0")])]);
    registry.publish_module("Gamma", &[("1.0.0", &[])]);
    // Beta and its dependency land in the plan before Alpha's narrower pin.
    registry.delay(&MockRegistry::registration_path("Alpha"), Duration::from_millis(500));

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha", "Beta"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.0.0", "Beta@1.0.0"]);
    assert_eq!(registry.hits(&MockRegistry::registration_path("Gamma")), 1);
}

#[tokio::test]
async fn test_narrowed_requirement_waits_for_pending_lookup() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Beta", "[1.0.0]")])]);
    registry.publish_module("Beta", &[("1.0.0", &[]), ("2.0.0", &[])]);
    registry.delay(&MockRegistry::registration_path("Beta"), Duration::from_millis(500));

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha", "Beta"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.0.0", "Beta@1.0.0"]);
}

#[tokio::test]
async fn test_two_part_pin_matches_three_part_release() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Beta", "[2.0]")]), ("1.1.0", &[])]);
    registry.publish_module("Beta", &[("2.0.0", &[]), ("2.1.0", &[])]);

    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&reqs(&["Alpha=1.0"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.0.0", "Beta@2.0.0"]);
}

#[tokio::test]
async fn test_update_mode_skips_current_local_install() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[])]);

    let local = TempDir::new().unwrap();
    install_local(local.path(), "Alpha", "1.0.0");

    let mut options = options(&registry, vec![local.path().to_path_buf()]);
    options.update = true;
    let mut resolver = resolver(options);
    let plan = resolver.resolve(&reqs(&["Alpha"])).await.unwrap();

    // The registry was consulted, but the newest version is already here.
    assert!(plan.is_empty());
    assert_eq!(registry.hits(&MockRegistry::registration_path("Alpha")), 1);
}

#[tokio::test]
async fn test_update_mode_plans_newer_version() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[]), ("1.2.0", &[])]);

    let local = TempDir::new().unwrap();
    install_local(local.path(), "Alpha", "1.0.0");

    let mut options = options(&registry, vec![local.path().to_path_buf()]);
    options.update = true;
    let plan = resolver(options).resolve(&reqs(&["Alpha"])).await.unwrap();

    assert_eq!(planned(&plan), vec!["Alpha@1.2.0"]);
}

#[tokio::test]
async fn test_documents_are_fetched_once_per_session() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Common", "1.0.0")])]);
    registry.publish_module("Beta", &[("1.0.0", &[("Common", "1.0.0")])]);
    registry.publish_module("Common", &[("1.0.0", &[])]);

    let client = RegistryClient::new(Duration::from_secs(5)).unwrap();
    let mut resolver = Resolver::new(client.clone(), options(&registry, Vec::new()));
    resolver.resolve(&reqs(&["Alpha", "Beta"])).await.unwrap();
    resolver.resolve(&reqs(&["Alpha", "Beta"])).await.unwrap();

    assert_eq!(registry.hits("/index.json"), 1);
    assert_eq!(registry.hits(&MockRegistry::registration_path("Common")), 1);

    client.clear_cache();
    resolver.resolve(&reqs(&["Alpha"])).await.unwrap();
    assert_eq!(registry.hits("/index.json"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_keeps_partial_plan() {
    let registry = MockRegistry::start().await;
    registry.publish_module("Alpha", &[("1.0.0", &[("Slow", "1.0.0")])]);
    registry.publish_module("Slow", &[("1.0.0", &[])]);
    registry.delay(&MockRegistry::registration_path("Slow"), Duration::from_secs(30));

    let mut resolver = resolver(options(&registry, Vec::new()));
    let token = resolver.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), resolver.resolve(&reqs(&["Alpha"])))
        .await
        .expect("resolution should stop promptly after cancellation")
        .unwrap_err();

    assert_eq!(err.code(), codes::MOD_CANCELLED);
    assert_eq!(resolver.state(), ResolveState::Cancelled);
    assert_eq!(planned(resolver.plan()), vec!["Alpha@1.0.0"]);
}

#[tokio::test]
async fn test_empty_requirements_finish_immediately() {
    let registry = MockRegistry::start().await;
    let mut resolver = resolver(options(&registry, Vec::new()));
    let plan = resolver.resolve(&[]).await.unwrap();
    assert!(plan.is_empty());
    assert_eq!(registry.total_hits(), 0);
}
