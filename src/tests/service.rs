use super::*;
use crate::channel::{ChannelError, ExecutionStatus};
use crate::test_support::{
    FakeChannel, FakeFetcher, ScriptedConfirmer, completed, healthy_package, unique_temp_path,
};
use rbridge_core::{MetadataFetcher, SafetyLevel};
use std::fs;

struct Harness {
    service: BridgeService,
    channel: Arc<FakeChannel>,
    fetcher: Arc<FakeFetcher>,
    confirmer: Arc<ScriptedConfirmer>,
}

fn harness(config: RbridgeConfig, channel: FakeChannel, fetcher: FakeFetcher, answer: bool) -> Harness {
    let channel = Arc::new(channel);
    let fetcher = Arc::new(fetcher);
    let confirmer = Arc::new(ScriptedConfirmer::answering(answer));
    let catalog = FetcherCatalog::from_fetchers([fetcher.clone() as Arc<dyn MetadataFetcher>]);
    let validator = SafetyValidator::new(catalog, config.check_policy(), "test-policy", None);
    let audit_logger =
        AuditLogger::at_path(&unique_temp_path("service-audit.log")).expect("audit logger");
    let service = BridgeService::with_parts(
        config,
        channel.clone(),
        validator,
        confirmer.clone(),
        audit_logger,
    );
    Harness {
        service,
        channel,
        fetcher,
        confirmer,
    }
}

fn cran_with(packages: &[&str]) -> FakeFetcher {
    packages
        .iter()
        .fold(FakeFetcher::new(PackageSource::Cran), |fetcher, name| {
            fetcher.with_package(healthy_package(name))
        })
}

/// Listener that reports `installed` for `list_installed` and `install_status` for installs.
fn library_listener(installed: &'static str, install_status: ExecutionStatus) -> FakeChannel {
    FakeChannel::new(move |command| match &command.action {
        CommandAction::ListInstalled => Ok(completed(command, installed)),
        CommandAction::InstallPackages { .. } => Ok(ExecutionResponse {
            id: Some(command.id.clone()),
            status: install_status,
            output: Some("installation log".to_string()),
            error: None,
            duration_ms: Some(900),
        }),
        other => panic!("unexpected command: {other:?}"),
    })
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[tokio::test]
async fn run_inline_code_returns_listener_output() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::completing("[1] 2"),
        FakeFetcher::new(PackageSource::Cran),
        true,
    );

    let outcome = h
        .service
        .run(Some("1 + 1"), RunOptions::default())
        .await
        .expect("run");

    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.output.as_deref(), Some("[1] 2"));
    let submitted = h.channel.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].action,
        CommandAction::RunCode {
            code: "1 + 1".to_string()
        }
    );
    assert_eq!(outcome.command_id, submitted[0].id);
    let prompts = h.confirmer.requests();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].details, vec!["1 + 1".to_string()]);
}

#[tokio::test]
async fn run_without_input_targets_current_buffer_without_prompt() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::completing(""),
        FakeFetcher::new(PackageSource::Cran),
        false,
    );

    h.service
        .run(None, RunOptions::default())
        .await
        .expect("run current");

    assert!(h.confirmer.requests().is_empty());
    assert_eq!(h.channel.submitted()[0].action, CommandAction::RunCurrent);
}

#[tokio::test]
async fn assume_yes_skips_prompt() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::completing("ok"),
        FakeFetcher::new(PackageSource::Cran),
        false,
    );

    h.service
        .run(Some("summary(cars)"), RunOptions { assume_yes: true })
        .await
        .expect("run");

    assert!(h.confirmer.requests().is_empty());
    assert_eq!(h.channel.submitted().len(), 1);
}

#[tokio::test]
async fn declined_run_is_rejected_before_submit() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::completing("ok"),
        FakeFetcher::new(PackageSource::Cran),
        false,
    );

    let err = h
        .service
        .run(Some("unlink('~', recursive = TRUE)"), RunOptions::default())
        .await
        .expect_err("declined");

    assert!(matches!(err, BridgeError::ExecutionRejected { .. }));
    assert!(h.channel.submitted().is_empty());
}

#[tokio::test]
async fn missing_script_fails_before_liveness_check() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::dead(),
        FakeFetcher::new(PackageSource::Cran),
        true,
    );
    let missing = unique_temp_path("script.R");

    let err = h
        .service
        .run(missing.to_str(), RunOptions::default())
        .await
        .expect_err("missing file");

    match err {
        BridgeError::SourceFileNotFound { path } => assert!(path.ends_with("script.R")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.confirmer.requests().is_empty());
    assert!(h.channel.submitted().is_empty());
}

#[tokio::test]
async fn dead_listener_is_never_submitted_to() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::dead(),
        FakeFetcher::new(PackageSource::Cran),
        true,
    );

    let err = h
        .service
        .run(Some("1 + 1"), RunOptions::default())
        .await
        .expect_err("listener down");

    match err {
        BridgeError::ListenerUnavailable { mailbox } => assert_eq!(mailbox, "memory://fake"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.channel.submitted().is_empty());
}

#[tokio::test]
async fn channel_timeout_is_reported_as_bridge_timeout() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::new(|command| {
            Err(ChannelError::Timeout {
                command_id: command.id.clone(),
                timeout: Duration::from_secs(30),
            })
        }),
        FakeFetcher::new(PackageSource::Cran),
        true,
    );

    let err = h
        .service
        .run(Some("Sys.sleep(60)"), RunOptions::default())
        .await
        .expect_err("timeout");

    match err {
        BridgeError::ChannelTimeout { timeout, .. } => {
            assert_eq!(timeout, Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn classify_distinguishes_code_scripts_and_documents() {
    let script = unique_temp_path("analysis.R");
    let document = unique_temp_path("report.Qmd");
    fs::write(&script, "x <- 1").expect("write script");
    fs::write(&document, "---\ntitle: demo\n---").expect("write document");

    assert_eq!(RunTarget::classify(None).expect("none"), RunTarget::CurrentBuffer);
    assert_eq!(RunTarget::classify(Some("   ")).expect("blank"), RunTarget::CurrentBuffer);
    assert_eq!(
        RunTarget::classify(script.to_str()).expect("script"),
        RunTarget::Script(script.clone())
    );
    assert_eq!(
        RunTarget::classify(document.to_str()).expect("document"),
        RunTarget::Document(document.clone())
    );
    assert_eq!(
        RunTarget::classify(Some("source('helpers.R')")).expect("code"),
        RunTarget::Code("source('helpers.R')".to_string())
    );
    assert_eq!(
        RunTarget::classify(Some("x <- 1\nread('a.R')")).expect("multi-line code"),
        RunTarget::Code("x <- 1\nread('a.R')".to_string())
    );

    let _ = fs::remove_file(script);
    let _ = fs::remove_file(document);
}

#[tokio::test]
async fn blacklisted_package_blocks_batch_without_submitting() {
    let mut config = RbridgeConfig::default();
    config.blacklist.packages.push("leftpad-clone".to_string());
    let h = harness(
        config,
        library_listener("", ExecutionStatus::Completed),
        cran_with(&["dplyr"]),
        true,
    );

    let err = h
        .service
        .install(&strings(&["dplyr", "leftpad-clone"]), InstallOptions::default())
        .await
        .expect_err("blocked");

    match err {
        BridgeError::InstallationBlocked { blocked } => {
            assert_eq!(blocked.len(), 1);
            assert_eq!(blocked[0].package, "leftpad-clone");
            assert_eq!(blocked[0].safety_level, SafetyLevel::Blocked);
            assert!(!blocked[0].errors.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.channel.submitted().is_empty());
    assert!(h.confirmer.requests().is_empty());
    assert_eq!(h.fetcher.metadata_calls(), 1);
}

#[tokio::test]
async fn every_blocked_package_is_listed() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Cran).unreachable(),
        true,
    );

    let err = h
        .service
        .install(&strings(&["a", "b", "c"]), InstallOptions::default())
        .await
        .expect_err("blocked");

    match err {
        BridgeError::InstallationBlocked { blocked } => {
            let names = blocked
                .iter()
                .map(|entry| entry.package.as_str())
                .collect::<Vec<_>>();
            assert_eq!(names, vec!["a", "b", "c"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn safe_packages_are_installed_in_one_batch() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("base\nstats", ExecutionStatus::Completed),
        cran_with(&["dplyr", "tidyr"]),
        false,
    );

    let outcome = h
        .service
        .install(&strings(&["dplyr", "tidyr", "dplyr"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.status, InstallStatus::Completed);
    assert_eq!(outcome.requested, strings(&["dplyr", "tidyr"]));
    assert_eq!(outcome.submitted, strings(&["dplyr", "tidyr"]));
    assert_eq!(outcome.reports.len(), 2);
    assert!(h.confirmer.requests().is_empty());

    let submitted = h.channel.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].action, CommandAction::ListInstalled);
    assert_eq!(
        submitted[1].action,
        CommandAction::InstallPackages {
            packages: strings(&["dplyr", "tidyr"]),
            source: PackageSource::Cran,
        }
    );
}

#[tokio::test]
async fn already_installed_packages_are_not_resubmitted() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("dplyr, ggplot2\n\"rlang\"", ExecutionStatus::Completed),
        cran_with(&["dplyr", "tidyr"]),
        true,
    );

    let outcome = h
        .service
        .install(&strings(&["dplyr", "tidyr"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.already_installed, strings(&["dplyr"]));
    assert_eq!(outcome.submitted, strings(&["tidyr"]));
}

#[tokio::test]
async fn nothing_is_submitted_when_everything_is_installed() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("dplyr", ExecutionStatus::Error),
        cran_with(&["dplyr"]),
        true,
    );

    let outcome = h
        .service
        .install(&strings(&["dplyr"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.status, InstallStatus::Completed);
    assert!(outcome.submitted.is_empty());
    assert_eq!(h.channel.submitted().len(), 1);
}

#[tokio::test]
async fn installed_listing_failure_sends_every_package() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::new(|command| match &command.action {
            CommandAction::ListInstalled => Err(ChannelError::Timeout {
                command_id: command.id.clone(),
                timeout: LIST_INSTALLED_TIMEOUT,
            }),
            _ => Ok(completed(command, "done")),
        }),
        cran_with(&["dplyr"]),
        true,
    );

    let outcome = h
        .service
        .install(&strings(&["dplyr"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.submitted, strings(&["dplyr"]));
    assert_eq!(outcome.status, InstallStatus::Completed);
}

#[tokio::test]
async fn risky_package_requires_confirmation() {
    let mut metadata = healthy_package("fresh");
    metadata.license = None;
    let h = harness(
        RbridgeConfig::default(),
        library_listener("", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Cran).with_package(metadata),
        false,
    );

    let err = h
        .service
        .install(&strings(&["fresh"]), InstallOptions::default())
        .await
        .expect_err("declined");

    assert!(matches!(err, BridgeError::InstallationCancelled { .. }));
    assert!(h.channel.submitted().is_empty());
    let prompts = h.confirmer.requests();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].details[0], "fresh (risky)");
}

#[tokio::test]
async fn confirmed_dangerous_package_is_installed() {
    let mut metadata = healthy_package("retired");
    metadata.archived = true;
    let h = harness(
        RbridgeConfig::default(),
        library_listener("", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Cran).with_package(metadata),
        true,
    );

    let outcome = h
        .service
        .install(&strings(&["retired"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.reports[0].safety_level, SafetyLevel::Dangerous);
    assert_eq!(outcome.status, InstallStatus::Completed);
    assert_eq!(h.confirmer.requests().len(), 1);
}

#[tokio::test]
async fn listener_status_maps_onto_install_status() {
    let cases = [
        (ExecutionStatus::Completed, InstallStatus::Completed),
        (ExecutionStatus::Running, InstallStatus::Partial),
        (ExecutionStatus::Pending, InstallStatus::Partial),
        (ExecutionStatus::Error, InstallStatus::Error),
        (ExecutionStatus::Rejected, InstallStatus::Error),
        (ExecutionStatus::Timeout, InstallStatus::Error),
    ];
    for (listener_status, expected) in cases {
        let h = harness(
            RbridgeConfig::default(),
            library_listener("", listener_status),
            cran_with(&["dplyr"]),
            true,
        );
        let outcome = h
            .service
            .install(&strings(&["dplyr"]), InstallOptions::default())
            .await
            .expect("install");
        assert_eq!(outcome.status, expected, "{listener_status:?}");
    }
}

#[tokio::test]
async fn skipped_checks_do_not_touch_registry() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Cran).unreachable(),
        false,
    );

    let outcome = h
        .service
        .install(
            &strings(&["internalpkg"]),
            InstallOptions {
                skip_safety_checks: true,
                ..InstallOptions::default()
            },
        )
        .await
        .expect("install");

    assert!(outcome.reports.is_empty());
    assert_eq!(outcome.submitted, strings(&["internalpkg"]));
    assert_eq!(h.fetcher.metadata_calls(), 0);
}

#[tokio::test]
async fn disabled_safety_config_skips_checks() {
    let mut config = RbridgeConfig::default();
    config.safety.enabled = false;
    let h = harness(
        config,
        library_listener("", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Cran).unreachable(),
        false,
    );

    let outcome = h
        .service
        .install(&strings(&["internalpkg"]), InstallOptions::default())
        .await
        .expect("install");

    assert_eq!(outcome.status, InstallStatus::Completed);
    assert_eq!(h.fetcher.metadata_calls(), 0);
}

#[tokio::test]
async fn unknown_source_is_rejected() {
    let h = harness(
        RbridgeConfig::default(),
        library_listener("", ExecutionStatus::Completed),
        cran_with(&["dplyr"]),
        true,
    );

    let err = h
        .service
        .install(
            &strings(&["dplyr"]),
            InstallOptions {
                source: Some("bioconductor".to_string()),
                ..InstallOptions::default()
            },
        )
        .await
        .expect_err("unsupported source");

    match err {
        BridgeError::UnsupportedSource {
            requested,
            supported,
        } => {
            assert_eq!(requested, "bioconductor");
            assert_eq!(supported, "cran, github");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn github_requests_compare_repository_name_with_library() {
    let mut metadata = healthy_package("r-lib/cli");
    metadata.source = PackageSource::Github;
    metadata.stars = Some(500);
    let h = harness(
        RbridgeConfig::default(),
        library_listener("cli", ExecutionStatus::Completed),
        FakeFetcher::new(PackageSource::Github).with_package(metadata),
        true,
    );

    let outcome = h
        .service
        .install(
            &strings(&["r-lib/cli"]),
            InstallOptions {
                source: Some("github".to_string()),
                ..InstallOptions::default()
            },
        )
        .await
        .expect("install");

    assert_eq!(outcome.already_installed, strings(&["r-lib/cli"]));
    assert!(outcome.submitted.is_empty());
}

#[tokio::test]
async fn check_returns_report_without_submitting() {
    let h = harness(
        RbridgeConfig::default(),
        FakeChannel::dead(),
        cran_with(&["dplyr"]),
        true,
    );

    let report = h.service.check("dplyr", None).await.expect("report");

    assert_eq!(report.safety_level, SafetyLevel::Safe);
    assert!(h.channel.submitted().is_empty());
}

#[test]
fn package_list_parsing_accepts_mixed_separators() {
    let parsed = parse_package_list("dplyr\n tidyr, \"rlang\"\t'vctrs'\n\n");
    let mut names = parsed.into_iter().collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["dplyr", "rlang", "tidyr", "vctrs"]);
}
