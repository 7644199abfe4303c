//! Default expression evaluator

mod context_evaluator;
mod operator;

pub use context_evaluator::ContextExpressionEvaluator;
pub use operator::ConditionOperator;
