use rbridge_core::{Check, CheckCategory, CheckContext, CheckId, CheckSeverity, SafetyCheck};

const CHECK_ID: CheckId = "dependencies";

pub fn create_check() -> Box<dyn Check> {
    Box::new(DependencyFootprintCheck)
}

pub struct DependencyFootprintCheck;

impl Check for DependencyFootprintCheck {
    fn id(&self) -> CheckId {
        CHECK_ID
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::DependencyFootprint
    }

    fn run(&self, context: &CheckContext<'_>) -> SafetyCheck {
        evaluate(
            context.package_name,
            context.metadata.dependencies.len(),
            context.policy.max_dependencies,
        )
    }
}

fn evaluate(package_name: &str, count: usize, max_dependencies: usize) -> SafetyCheck {
    let check = if count > max_dependencies.saturating_mul(2) {
        SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::DependencyFootprint,
            CheckSeverity::Error,
            format!(
                "{package_name} declares {count} direct dependencies (more than twice the limit of {max_dependencies})"
            ),
        )
    } else if count > max_dependencies {
        SafetyCheck::fail(
            CHECK_ID,
            CheckCategory::DependencyFootprint,
            CheckSeverity::Warning,
            format!(
                "{package_name} declares {count} direct dependencies (limit {max_dependencies})"
            ),
        )
    } else {
        SafetyCheck::pass(
            CHECK_ID,
            CheckCategory::DependencyFootprint,
            format!("{package_name} declares {count} direct dependencies"),
        )
    };

    check.with_metadata("dependency_count", count)
}
