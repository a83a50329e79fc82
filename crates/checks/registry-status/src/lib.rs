use chrono::{DateTime, Utc};
use rbridge_core::{
    Check, CheckCategory, CheckContext, CheckId, CheckSeverity, PackageMetadata, SafetyCheck,
};

const CHECK_ID: CheckId = "registry_status";

pub fn create_check() -> Box<dyn Check> {
    Box::new(RegistryStatusCheck)
}

pub struct RegistryStatusCheck;

impl Check for RegistryStatusCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::RegistryStatus
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        evaluate(
            context.metadata,
            context.policy.stale_after_days,
            context.now,
        )
    }
}

fn evaluate(metadata: &PackageMetadata, stale_after_days: i64, now: DateTime<Utc>) -> SafetyCheck {
    if metadata.archived {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::RegistryStatus,
            CheckSeverity::Error,
            format!("{} has been archived on {}", metadata.name, metadata.source),
        )
        .with_metadata("archived", true);
    }

    let Some(last_updated) = metadata.last_updated else {
        return SafetyCheck::pass(
            CHECK_ID,
            CheckCategory::RegistryStatus,
            format!(
                "{} is listed on {} (no update date reported)",
                metadata.name, metadata.source
            ),
        );
    };

    let age_days = now.signed_duration_since(last_updated).num_days();
    if age_days > stale_after_days {
        return SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::RegistryStatus,
            CheckSeverity::Warning,
            format!(
                "{} has not been updated in {age_days} day(s) (> {stale_after_days} days)",
                metadata.name
            ),
        )
        .with_metadata("days_since_update", age_days);
    }

    SafetyCheck::pass(
        CHECK_ID,
        CheckCategory::RegistryStatus,
        format!("{} is active on {}", metadata.name, metadata.source),
    )
    .with_metadata("days_since_update", age_days)
}
