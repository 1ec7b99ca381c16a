//! Fixtures shared by the TreeFlow test suites.

pub mod evaluator;
pub mod fixtures;

pub use evaluator::ScriptedEvaluator;
pub use fixtures::{onboarding_v1, OnboardingFlow, USER_CONFIRMED, USER_RETRY};
