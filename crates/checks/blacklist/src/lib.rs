use glob::{MatchOptions, Pattern};
use rbridge_core::{
    BlacklistPolicy, Check, CheckCategory, CheckContext, CheckId, CheckSeverity, SafetyCheck,
};

const CHECK_ID: CheckId = "blacklist";
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

pub fn create_check() -> Box<dyn Check> {
    Box::new(BlacklistCheck)
}

pub struct BlacklistCheck;

impl Check for BlacklistCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::Blacklist
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        let policy = &context.policy.blacklist;
        check_name(context.package_name, policy)
            .or_else(|| {
                check_maintainer(
                    context.package_name,
                    context.metadata.maintainer.as_deref(),
                    policy,
                )
            })
            .unwrap_or_else(|| {
                SafetyCheck::pass(
                    CHECK_ID,
                    CheckCategory::Blacklist,
                    format!("{} is not blacklisted", context.package_name),
                )
            })
    }
}

/// Name-only blacklist lookup; needs no registry metadata.
pub fn check_name(package_name: &str, policy: &BlacklistPolicy) -> Option<SafetyCheck> {
    if let Some(entry) = policy
        .packages
        .iter()
        .find(|entry| entry.trim().eq_ignore_ascii_case(package_name.trim()))
    {
        return Some(blocked(
            format!("{package_name} is blacklisted"),
            "package",
            entry,
        ));
    }

    policy
        .patterns
        .iter()
        .find(|pattern| pattern_matches(pattern, package_name))
        .map(|pattern| {
            blocked(
                format!("{package_name} matches blacklisted pattern '{pattern}'"),
                "pattern",
                pattern,
            )
        })
}

fn check_maintainer(
    package_name: &str,
    maintainer: Option<&str>,
    policy: &BlacklistPolicy,
) -> Option<SafetyCheck> {
    let maintainer = maintainer?.to_ascii_lowercase();
    policy
        .maintainers
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .find(|entry| maintainer.contains(&entry.trim().to_ascii_lowercase()))
        .map(|entry| {
            blocked(
                format!("{package_name} is maintained by blacklisted maintainer '{entry}'"),
                "maintainer",
                entry,
            )
        })
}

fn pattern_matches(pattern: &str, package_name: &str) -> bool {
    match Pattern::new(pattern.trim()) {
        Ok(compiled) => compiled.matches_with(package_name, MATCH_OPTIONS),
        // Malformed globs degrade to an exact comparison.
        Err(_) => pattern.trim().eq_ignore_ascii_case(package_name),
    }
}

fn blocked(message: String, rule_kind: &str, rule: &str) -> SafetyCheck {
    SafetyCheck::fail(
        CHECK_ID,
        CheckCategory::Blacklist,
        CheckSeverity::Critical,
        message,
    )
    .with_metadata("rule_kind", rule_kind)
    .with_metadata("rule", rule)
}
