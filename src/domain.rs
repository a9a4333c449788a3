// Domain layer modules
pub mod condition;
pub mod condition_evaluator;
pub mod error_reason;
pub mod item;
pub mod update;
pub mod version;

// Re-exports
pub use condition::{Comparator, Condition, ConditionError, Folded, StringOperator};
pub use condition_evaluator::ConditionEvaluator;
pub use error_reason::{labels, ErrorReason, ReasonDetail};
pub use item::Item;
pub use update::{apply_update, check_overlap, Increments};
pub use version::{parse_version, Engine, ParsedVersion, VersionParseError};
