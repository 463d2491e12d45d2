//! Verification tier classifier (C5): a pure function over a passing
//! run's command log. Never inspects anything but the commands that
//! actually executed and their `authored_by` tags from the command plan.

use crate::model::{ExecutedCommand, Stage, TestAuthor, Tier};

/// Returns `None` when the L0 floor wasn't met by executed evidence — a
/// tier claim must never rest on a check that never ran (§4.5).
pub fn classify_tier(commands: &[ExecutedCommand]) -> Option<Tier> {
    let passed = |stage: Stage| {
        commands
            .iter()
            .any(|c| c.stage == stage && c.exit_code == Some(0))
    };

    let l0 = passed(Stage::Parse) && passed(Stage::Lint) && passed(Stage::TypeCheck);

    let passing_tests: Vec<&ExecutedCommand> = commands
        .iter()
        .filter(|c| {
            matches!(c.stage, Stage::UnitTest | Stage::IntegrationTest | Stage::AiTest)
                && c.exit_code == Some(0)
        })
        .collect();

    let all_ai_authored = !passing_tests.is_empty()
        && passing_tests.iter().all(|c| c.authored_by == TestAuthor::Ai);

    if all_ai_authored {
        return Some(Tier::AiTestsOnly);
    }

    if !l0 {
        return None;
    }

    let l1 = passing_tests
        .iter()
        .any(|c| c.stage == Stage::UnitTest && c.authored_by == TestAuthor::Human);
    if !l1 {
        return Some(Tier::L0);
    }

    let l2 = passing_tests
        .iter()
        .any(|c| c.stage == Stage::IntegrationTest && c.authored_by == TestAuthor::Human);
    if l2 {
        Some(Tier::L2)
    } else {
        Some(Tier::L1)
    }
}

/// A tier of `AiTestsOnly` forces human review regardless of how many
/// stages passed (P6).
pub fn requires_human_review(tier: Tier) -> bool {
    matches!(tier, Tier::AiTestsOnly)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(stage: Stage, authored_by: TestAuthor, exit_code: Option<i32>) -> ExecutedCommand {
        ExecutedCommand {
            stage,
            argv: vec![],
            exit_code,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            duration_ms: 0,
            authored_by,
            artifact_path: None,
        }
    }

    fn na(stage: Stage) -> ExecutedCommand {
        cmd(stage, TestAuthor::NotApplicable, Some(0))
    }

    #[test]
    fn l0_requires_parse_lint_typecheck() {
        let commands = vec![na(Stage::Parse), na(Stage::Lint), na(Stage::TypeCheck)];
        assert_eq!(classify_tier(&commands), Some(Tier::L0));
    }

    #[test]
    fn missing_typecheck_yields_no_tier() {
        let commands = vec![na(Stage::Parse), na(Stage::Lint)];
        assert_eq!(classify_tier(&commands), None);
    }

    #[test]
    fn l1_requires_passing_human_unit_test() {
        let commands = vec![
            na(Stage::Parse),
            na(Stage::Lint),
            na(Stage::TypeCheck),
            cmd(Stage::UnitTest, TestAuthor::Human, Some(0)),
        ];
        assert_eq!(classify_tier(&commands), Some(Tier::L1));
    }

    #[test]
    fn l2_requires_passing_human_integration_test_on_top_of_l1() {
        let commands = vec![
            na(Stage::Parse),
            na(Stage::Lint),
            na(Stage::TypeCheck),
            cmd(Stage::UnitTest, TestAuthor::Human, Some(0)),
            cmd(Stage::IntegrationTest, TestAuthor::Human, Some(0)),
        ];
        assert_eq!(classify_tier(&commands), Some(Tier::L2));
    }

    #[test]
    fn all_ai_authored_tests_forces_ai_tests_only() {
        let commands = vec![
            na(Stage::Parse),
            na(Stage::Lint),
            na(Stage::TypeCheck),
            cmd(Stage::UnitTest, TestAuthor::Ai, Some(0)),
        ];
        assert_eq!(classify_tier(&commands), Some(Tier::AiTestsOnly));
        assert!(requires_human_review(Tier::AiTestsOnly));
    }

    #[test]
    fn ai_tests_only_does_not_require_the_l0_floor() {
        let commands = vec![cmd(Stage::UnitTest, TestAuthor::Ai, Some(0))];
        assert_eq!(classify_tier(&commands), Some(Tier::AiTestsOnly));
    }

    #[test]
    fn mixed_human_and_ai_tests_does_not_trigger_ai_tests_only() {
        let commands = vec![
            na(Stage::Parse),
            na(Stage::Lint),
            na(Stage::TypeCheck),
            cmd(Stage::UnitTest, TestAuthor::Human, Some(0)),
            cmd(Stage::AiTest, TestAuthor::Ai, Some(0)),
        ];
        assert_eq!(classify_tier(&commands), Some(Tier::L1));
        assert!(!requires_human_review(Tier::L1));
    }
}
