use chrono::{DateTime, Utc};
use rbridge_core::{
    Check, CheckCategory, CheckContext, CheckId, CheckSeverity, PackageMetadata, PackageSource,
    SafetyCheck,
};

const CHECK_ID: CheckId = "popularity";

pub fn create_check() -> Box<dyn Check> {
    Box::new(PopularityCheck)
}

pub struct PopularityCheck;

impl Check for PopularityCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::CommunityTrust
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        let thresholds = Thresholds {
            min_monthly_downloads: context.policy.min_monthly_downloads,
            min_stars: context.policy.min_stars,
            young_package_days: context.policy.young_package_days,
        };
        evaluate(context.metadata, &thresholds, context.now)
    }
}

struct Thresholds {
    min_monthly_downloads: u64,
    min_stars: u64,
    young_package_days: i64,
}

fn evaluate(metadata: &PackageMetadata, thresholds: &Thresholds, now: DateTime<Utc>) -> SafetyCheck {
    // Repositories have no download statistics; stars stand in for adoption.
    let (signal, observed, minimum) = match (metadata.source, metadata.stars) {
        (PackageSource::Github, Some(stars)) => ("stars", stars, thresholds.min_stars),
        _ => (
            "monthly downloads",
            metadata.monthly_downloads,
            thresholds.min_monthly_downloads,
        ),
    };

    if observed >= minimum {
        return SafetyCheck::pass(
            CHECK_ID,
            CheckCategory::CommunityTrust,
            format!("{} has {observed} {signal}", metadata.name),
        )
        .with_metadata("adoption_signal", signal)
        .with_metadata("adoption", observed);
    }

    let age_days = metadata
        .published
        .map(|published| now.signed_duration_since(published).num_days());
    match age_days {
        Some(age_days) if age_days <= thresholds.young_package_days => SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::CommunityTrust,
            CheckSeverity::Error,
            format!(
                "{} has low adoption ({observed} {signal}) and is only {age_days} day(s) old",
                metadata.name
            ),
        )
        .with_metadata("adoption_signal", signal)
        .with_metadata("adoption", observed)
        .with_metadata("age_days", age_days),
        _ => SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::CommunityTrust,
            CheckSeverity::Warning,
            format!(
                "{} has low adoption ({observed} {signal}, expected at least {minimum})",
                metadata.name
            ),
        )
        .with_metadata("adoption_signal", signal)
        .with_metadata("adoption", observed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn thresholds() -> Thresholds {
        Thresholds {
            min_monthly_downloads: 100,
            min_stars: 10,
            young_package_days: 30,
        }
    }

    fn cran_package(downloads: u64, days_old: i64) -> PackageMetadata {
        let mut metadata = PackageMetadata::new("demo", PackageSource::Cran);
        metadata.monthly_downloads = downloads;
        metadata.published = Some(Utc::now() - Duration::days(days_old));
        metadata
    }

    #[test]
    fn popular_package_passes() {
        let check = evaluate(&cran_package(5000, 3), &thresholds(), Utc::now());
        assert!(check.passed);
        assert_eq!(check.metadata["adoption"], "5000");
        assert_eq!(check.metadata["adoption_signal"], "monthly downloads");
    }

    #[test]
    fn low_downloads_on_old_package_is_warning() {
        let check = evaluate(&cran_package(10, 400), &thresholds(), Utc::now());
        assert!(!check.passed);
        assert_eq!(check.severity, CheckSeverity::Warning);
    }

    #[test]
    fn low_downloads_on_young_package_is_error() {
        let check = evaluate(&cran_package(10, 3), &thresholds(), Utc::now());
        assert_eq!(check.severity, CheckSeverity::Error);
        assert!(check.message.contains("low adoption"));
    }

    #[test]
    fn zero_downloads_without_publish_date_is_warning() {
        let mut metadata = PackageMetadata::new("demo", PackageSource::Cran);
        metadata.published = None;
        let check = evaluate(&metadata, &thresholds(), Utc::now());
        assert_eq!(check.severity, CheckSeverity::Warning);
    }

    #[test]
    fn github_packages_use_stars() {
        let mut metadata = PackageMetadata::new("demo", PackageSource::Github);
        metadata.stars = Some(50);
        assert!(evaluate(&metadata, &thresholds(), Utc::now()).passed);

        metadata.stars = Some(2);
        let check = evaluate(&metadata, &thresholds(), Utc::now());
        assert!(!check.passed);
        assert!(check.message.contains("stars"));
    }
}
