//! Failure classifier (C3): a closed, priority-ordered rule set mapping a
//! verification run's raw signal onto one `FailureClass`. First match
//! wins — a result matching both a higher and a lower rule always takes
//! the higher one.

use crate::model::{ExecutedCommand, FailureClass, Stage, VerificationResult};

/// Pre-digested signal the classifier's rules run over. Kept separate
/// from `VerificationResult` so the rule priority can be unit tested
/// directly against synthetic combinations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawExecutionOutcome {
    pub parse_failed: bool,
    pub policy_denied: bool,
    pub timed_out: bool,
    pub flake: bool,
    pub internal_error: bool,
}

/// Priority-ordered rules, evaluated top to bottom. The order here is
/// the contract: do not reorder without updating the priority test below.
pub fn classify(outcome: &RawExecutionOutcome) -> FailureClass {
    if outcome.parse_failed {
        return FailureClass::Syntax;
    }
    if outcome.policy_denied {
        return FailureClass::Policy;
    }
    if outcome.timed_out {
        return FailureClass::Timeout;
    }
    if outcome.flake {
        return FailureClass::Flake;
    }
    FailureClass::Deterministic
}

/// Builds a `RawExecutionOutcome` from a failed `VerificationResult` and
/// the immediately preceding attempt's commands (if any), then classifies
/// it. Returns `None` for a passing result — there is nothing to classify.
pub fn classify_result(
    result: &VerificationResult,
    previous_attempt: Option<&[ExecutedCommand]>,
) -> Option<FailureClass> {
    if result.passed {
        return None;
    }
    if result.internal_error.is_some() {
        return Some(classify(&RawExecutionOutcome {
            internal_error: true,
            ..Default::default()
        }));
    }

    let parse_failed = result
        .commands
        .iter()
        .any(|c| c.stage == Stage::Parse && c.exit_code != Some(0));
    let policy_denied = result.commands.iter().any(is_policy_denial);
    let timed_out = result.commands.iter().any(|c| c.exit_code.is_none());
    let flake = previous_attempt
        .map(|prev| detect_flake(&result.commands, prev))
        .unwrap_or(false);

    Some(classify(&RawExecutionOutcome {
        parse_failed,
        policy_denied,
        timed_out,
        flake,
        internal_error: false,
    }))
}

fn is_policy_denial(command: &ExecutedCommand) -> bool {
    command.exit_code != Some(0)
        && (command.stderr_tail.contains("Unsupported")
            || command.stderr_tail.contains("network egress denied")
            || command.stderr_tail.contains("permission denied"))
}

/// Flake membership (§4.2 Open Question resolution): a failing command
/// this attempt is flake if the same argv passed in the immediately
/// preceding attempt. Degenerates to a single N vs N-1 comparison since
/// `max_attempts` never allows more than two fail-then-fail pairs.
fn detect_flake(current: &[ExecutedCommand], previous: &[ExecutedCommand]) -> bool {
    current.iter().any(|c| {
        c.exit_code != Some(0)
            && previous
                .iter()
                .any(|p| p.argv == c.argv && p.exit_code == Some(0))
    })
}
