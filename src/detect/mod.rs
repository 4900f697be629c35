//! Detection engines: tree-sitter rule evaluation with a regex fallback,
//! plus the classifier that turns raw findings into typed issues.

pub mod ast;
pub mod classify;
pub mod grammar;
pub mod regex_rules;
pub mod rules;

pub use ast::{AnalysisOutcome, AnalyzeOptions, AstEngine, DetectedViolation};
pub use grammar::Language;
