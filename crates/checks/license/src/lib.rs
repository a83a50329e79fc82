use rbridge_core::{Check, CheckCategory, CheckContext, CheckId, CheckSeverity, SafetyCheck};

const CHECK_ID: CheckId = "license";

pub fn create_check() -> Box<dyn Check> {
    Box::new(LicenseCheck)
}

pub struct LicenseCheck;

impl Check for LicenseCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::License
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        evaluate(
            context.package_name,
            context.metadata.license.as_deref(),
            &context.policy.accepted_licenses,
            &context.policy.restricted_licenses,
        )
    }
}

fn evaluate(
    package_name: &str,
    license: Option<&str>,
    accepted: &[String],
    restricted: &[String],
) -> SafetyCheck {
    let Some(license) = license.map(str::trim).filter(|value| !value.is_empty()) else {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::License,
            CheckSeverity::Warning,
            format!("{package_name} does not declare a license"),
        );
    };

    let lowered = license.to_ascii_lowercase();
    let contains = |needle: &String| {
        let needle = needle.trim().to_ascii_lowercase();
        !needle.is_empty() && lowered.contains(&needle)
    };

    // Restricted terms win even when combined with an accepted license.
    if let Some(term) = restricted.iter().find(|term| contains(term)) {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::License,
            CheckSeverity::Error,
            format!("{package_name} is distributed under a restricted license ({license})"),
        )
        .with_metadata("license", license)
        .with_metadata("restricted_term", term);
    }

    if accepted.iter().any(contains) {
        return SafetyCheck::pass(
            CHECK_ID,
            CheckCategory::License,
            format!("{package_name} is licensed under {license}"),
        )
        .with_metadata("license", license);
    }

    SafetyCheck::fail(
        CHECK_ID,
        CheckCategory::License,
        CheckSeverity::Warning,
        format!("{package_name} uses an unrecognized license ({license})"),
    )
    .with_metadata("license", license)
}
