//! Transition guards.
//!
//! A guard is either an expression string, enabled when the result is
//! truthy, or a reference to a named predicate registered on the
//! interpreter:
//!
//! ```json
//! {"target": "paid", "guard": "ctx.balance >= event.data.amount"}
//! {"target": "paid", "guard": {"predicate": "has_credit"}}
//! ```

use crate::context::Context;
use crate::error::ResolutionError;
use crate::event::Event;
use crate::expr::Expression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A side-effect-free condition on a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Guard {
    Expression(Expression),
    Predicate { predicate: String },
}

impl Guard {
    /// Parses an expression guard.
    pub fn expr(source: &str) -> Result<Self, crate::error::CoreError> {
        Ok(Guard::Expression(Expression::parse(source)?))
    }

    pub fn predicate(name: impl Into<String>) -> Self {
        Guard::Predicate {
            predicate: name.into(),
        }
    }

    /// Name of the referenced predicate, if any.
    pub fn predicate_name(&self) -> Option<&str> {
        match self {
            Guard::Predicate { predicate } => Some(predicate),
            Guard::Expression(_) => None,
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Expression(expr) => write!(f, "{}", expr),
            Guard::Predicate { predicate } => write!(f, "predicate:{}", predicate),
        }
    }
}

/// A host-supplied boolean condition.
pub type Predicate = Arc<dyn Fn(&Context, Option<&Event>) -> bool + Send + Sync>;

/// Registry of named predicates.
#[derive(Clone, Default)]
pub struct Predicates {
    entries: HashMap<String, Predicate>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Context, Option<&Event>) -> bool + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(predicate));
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for Predicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Predicates").field("names", &names).finish()
    }
}

/// Evaluates guards against a context and event.
pub struct GuardEvaluator<'a> {
    predicates: &'a Predicates,
}

impl<'a> GuardEvaluator<'a> {
    pub fn new(predicates: &'a Predicates) -> Self {
        Self { predicates }
    }

    pub fn evaluate(
        &self,
        guard: &Guard,
        ctx: &Context,
        event: Option<&Event>,
    ) -> Result<bool, ResolutionError> {
        match guard {
            Guard::Expression(expr) => expr.test(ctx, event),
            Guard::Predicate { predicate } => {
                let check =
                    self.predicates
                        .get(predicate)
                        .ok_or_else(|| ResolutionError::UnknownPredicate {
                            name: predicate.clone(),
                        })?;
                Ok(check(ctx, event))
            }
        }
    }

    /// An absent guard always passes.
    pub fn evaluate_opt(
        &self,
        guard: Option<&Guard>,
        ctx: &Context,
        event: Option<&Event>,
    ) -> Result<bool, ResolutionError> {
        match guard {
            Some(guard) => self.evaluate(guard, ctx, event),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_guard_passes() {
        let predicates = Predicates::new();
        let evaluator = GuardEvaluator::new(&predicates);
        assert!(evaluator.evaluate_opt(None, &Context::new(), None).unwrap());
    }

    #[test]
    fn test_expression_guard() {
        let predicates = Predicates::new();
        let evaluator = GuardEvaluator::new(&predicates);
        let guard = Guard::expr("ctx.balance >= event.data.amount").unwrap();
        let ctx = Context::from_value(json!({"balance": 100})).unwrap();

        let cheap = Event::with_data("PAY", json!({"amount": 40}));
        let pricey = Event::with_data("PAY", json!({"amount": 400}));
        assert!(evaluator.evaluate(&guard, &ctx, Some(&cheap)).unwrap());
        assert!(!evaluator.evaluate(&guard, &ctx, Some(&pricey)).unwrap());
    }

    #[test]
    fn test_expression_guard_failure() {
        let predicates = Predicates::new();
        let evaluator = GuardEvaluator::new(&predicates);
        let guard = Guard::expr("ctx.missing > 1").unwrap();

        let result = evaluator.evaluate(&guard, &Context::new(), None);
        assert!(matches!(result, Err(ResolutionError::MissingPath { .. })));
    }

    #[test]
    fn test_predicate_guard() {
        let mut predicates = Predicates::new();
        predicates.insert("is_admin", |ctx: &Context, _: Option<&Event>| {
            ctx.get("role") == Some(&json!("admin"))
        });
        let evaluator = GuardEvaluator::new(&predicates);

        let admin = Context::from_value(json!({"role": "admin"})).unwrap();
        let user = Context::from_value(json!({"role": "user"})).unwrap();
        let guard = Guard::predicate("is_admin");

        assert!(evaluator.evaluate(&guard, &admin, None).unwrap());
        assert!(!evaluator.evaluate(&guard, &user, None).unwrap());

        let unknown = Guard::predicate("nope");
        assert!(matches!(
            evaluator.evaluate(&unknown, &admin, None),
            Err(ResolutionError::UnknownPredicate { .. })
        ));
    }

    #[test]
    fn test_guard_serde_forms() {
        let guards: Vec<Guard> =
            serde_json::from_value(json!(["!ctx.locked", {"predicate": "has_credit"}])).unwrap();

        assert!(matches!(guards[0], Guard::Expression(_)));
        assert_eq!(guards[1].predicate_name(), Some("has_credit"));
        assert_eq!(
            serde_json::to_value(&guards).unwrap(),
            json!(["!ctx.locked", {"predicate": "has_credit"}])
        );
    }

    #[test]
    fn test_bad_expression_rejected() {
        let result: Result<Guard, _> = serde_json::from_value(json!("ctx.a >"));
        assert!(result.is_err());
    }
}
