pub mod outcome_classifier;
pub mod result_aggregator;
pub mod retry_policy;

pub use outcome_classifier::{OutcomeClassifier, PageSignals};
pub use result_aggregator::ResultAggregator;
pub use retry_policy::{AttemptRunner, RetryDecision, RetryPolicy};
