use rbridge_core::{Check, CheckCategory, CheckContext, CheckId, CheckSeverity, SafetyCheck};

const CHECK_ID: CheckId = "maintenance";
const ORPHANED_MARKER: &str = "orphaned";

pub fn create_check() -> Box<dyn Check> {
    Box::new(MaintenanceCheck)
}

pub struct MaintenanceCheck;

impl Check for MaintenanceCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::Maintenance
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        evaluate(
            context.package_name,
            context.metadata.maintainer.as_deref(),
            &context.policy.trusted_maintainers,
        )
    }
}

fn evaluate(package_name: &str, maintainer: Option<&str>, trusted: &[String]) -> SafetyCheck {
    let Some(maintainer) = maintainer.map(str::trim).filter(|value| !value.is_empty()) else {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::Maintenance,
            CheckSeverity::Warning,
            format!("{package_name} lists no maintainer"),
        );
    };

    let lowered = maintainer.to_ascii_lowercase();
    if lowered.contains(ORPHANED_MARKER) {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::Maintenance,
            CheckSeverity::Error,
            format!("{package_name} is orphaned and has no active maintainer"),
        )
        .with_metadata("maintainer", maintainer);
    }

    if let Some(entry) = trusted
        .iter()
        .find(|entry| lowered.contains(&entry.trim().to_ascii_lowercase()))
    {
        return SafetyCheck::pass(
            CHECK_ID,
            CheckCategory::Maintenance,
            format!("{package_name} is maintained by trusted maintainer '{entry}'"),
        )
        .with_metadata("maintainer", maintainer)
        .with_metadata("trusted", true);
    }

    SafetyCheck::pass(
        CHECK_ID,
        CheckCategory::Maintenance,
        format!("{package_name} is maintained by {maintainer}"),
    )
    .with_metadata("maintainer", maintainer)
}
