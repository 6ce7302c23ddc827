//! Registry of contextualizers: the functions that service calls name.
//!
//! The registry is keyed by service call name and resolved once at
//! construction. [`ComponentRegistry::core`] provides the built-in
//! [`CoreFunctor`] implementations; anything else is registered by the host.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::model::{CoreFunctor, ServiceCall};
use crate::observable::Observable;
use crate::scale::Scale;
use crate::value::Value;

/// Everything a computation step can see.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub observable: &'a Observable,
    pub scale: &'a Scale,
    /// Results of the actuator's dependencies, by name, in declaration order.
    pub dependencies: &'a [(String, Option<Value>)],
    /// Output of the previous step of the same actuator.
    pub previous: Option<&'a Value>,
}

impl StepInput<'_> {
    pub fn dependency(&self, name: &str) -> Option<&Value> {
        self.dependencies
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// A leaf computation invoked by name from a service call.
pub trait Contextualizer: Send + Sync + fmt::Debug {
    /// Service call name this contextualizer answers to.
    fn name(&self) -> &str;

    /// Run `call`. `Ok(None)` means the step produced nothing to observe.
    fn apply(&self, call: &ServiceCall, input: &StepInput<'_>) -> Result<Option<Value>, String>;
}

#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn Contextualizer>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every core functor registered.
    pub fn core() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ConstantResolver));
        registry.register(Arc::new(UrnResolver));
        registry.register(Arc::new(LutResolver));
        registry.register(Arc::new(ExpressionResolver));
        registry.register(Arc::new(DeferredResolver));
        registry
    }

    /// Register a contextualizer, returning the one it replaces.
    pub fn register(&mut self, component: Arc<dyn Contextualizer>) -> Option<Arc<dyn Contextualizer>> {
        self.components.insert(component.name().to_string(), component)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Contextualizer>> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Core functors
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ConstantResolver;

impl Contextualizer for ConstantResolver {
    fn name(&self) -> &str {
        CoreFunctor::ConstantResolver.service_call_name()
    }

    fn apply(&self, call: &ServiceCall, _input: &StepInput<'_>) -> Result<Option<Value>, String> {
        call.parameters
            .get("value")
            .cloned()
            .map(Some)
            .ok_or_else(|| "missing `value` parameter".to_string())
    }
}

/// Binds the observation to external resources. The resources themselves
/// are fetched by the host, so the value is the list of URNs.
#[derive(Debug)]
struct UrnResolver;

impl Contextualizer for UrnResolver {
    fn name(&self) -> &str {
        CoreFunctor::UrnResolver.service_call_name()
    }

    fn apply(&self, call: &ServiceCall, _input: &StepInput<'_>) -> Result<Option<Value>, String> {
        match call.parameters.get("urns") {
            Some(Value::List(urns)) if !urns.is_empty() => Ok(Some(Value::List(urns.clone()))),
            Some(Value::Text(urn)) => Ok(Some(Value::List(vec![Value::Text(urn.clone())]))),
            _ => Err("no resource urns given".to_string()),
        }
    }
}

/// Reclassifies the previous value. Without table contents at hand the
/// value passes through unchanged, keyed by the table it was classified by.
#[derive(Debug)]
struct LutResolver;

impl Contextualizer for LutResolver {
    fn name(&self) -> &str {
        CoreFunctor::LutResolver.service_call_name()
    }

    fn apply(&self, call: &ServiceCall, input: &StepInput<'_>) -> Result<Option<Value>, String> {
        let table = ["lookupTable", "classification", "accordingTo"]
            .iter()
            .find_map(|k| call.parameters.get(k))
            .ok_or_else(|| "no lookup table, classification or authority given".to_string())?;
        let Some(previous) = input.previous else {
            return Ok(None);
        };
        Ok(Some(Value::Map(
            crate::value::Parameters::new()
                .with("table", table.clone())
                .with("value", previous.clone()),
        )))
    }
}

/// Arithmetic over dependency values: numbers, dependency names, `self` for
/// the previous step's value, `+ - * /` and parentheses.
#[derive(Debug)]
struct ExpressionResolver;

impl Contextualizer for ExpressionResolver {
    fn name(&self) -> &str {
        CoreFunctor::ExpressionResolver.service_call_name()
    }

    fn apply(&self, call: &ServiceCall, input: &StepInput<'_>) -> Result<Option<Value>, String> {
        let source = call
            .parameters
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing `expression` parameter".to_string())?;
        let lookup = |name: &str| -> Option<f64> {
            if name == "self" {
                return input.previous.and_then(Value::as_f64);
            }
            input.dependency(name).and_then(Value::as_f64)
        };
        expression::evaluate(source, &lookup).map(|x| Some(Value::Float(x)))
    }
}

/// Deferred observables are resolved by a later request, so nothing is
/// computed here.
#[derive(Debug)]
struct DeferredResolver;

impl Contextualizer for DeferredResolver {
    fn name(&self) -> &str {
        CoreFunctor::Deferred.service_call_name()
    }

    fn apply(&self, _call: &ServiceCall, _input: &StepInput<'_>) -> Result<Option<Value>, String> {
        Ok(None)
    }
}

mod expression {
    use std::iter::Peekable;
    use std::str::Chars;

    /// Parentheses and unary minus may nest this deep.
    pub const MAX_NESTING: usize = 64;

    pub fn evaluate(source: &str, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, String> {
        let mut parser = Parser {
            chars: source.chars().peekable(),
            lookup,
            depth: 0,
        };
        let value = parser.sum()?;
        parser.skip_space();
        match parser.chars.peek() {
            None => Ok(value),
            Some(c) => Err(format!("unexpected {c:?} in expression")),
        }
    }

    struct Parser<'a> {
        chars: Peekable<Chars<'a>>,
        lookup: &'a dyn Fn(&str) -> Option<f64>,
        depth: usize,
    }

    impl Parser<'_> {
        fn skip_space(&mut self) {
            while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
        }

        fn sum(&mut self) -> Result<f64, String> {
            let mut acc = self.product()?;
            loop {
                self.skip_space();
                match self.chars.peek() {
                    Some('+') => {
                        self.chars.next();
                        acc += self.product()?;
                    }
                    Some('-') => {
                        self.chars.next();
                        acc -= self.product()?;
                    }
                    _ => return Ok(acc),
                }
            }
        }

        fn product(&mut self) -> Result<f64, String> {
            let mut acc = self.atom()?;
            loop {
                self.skip_space();
                match self.chars.peek() {
                    Some('*') => {
                        self.chars.next();
                        acc *= self.atom()?;
                    }
                    Some('/') => {
                        self.chars.next();
                        let divisor = self.atom()?;
                        if divisor == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        acc /= divisor;
                    }
                    _ => return Ok(acc),
                }
            }
        }

        fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
            if self.depth >= MAX_NESTING {
                return Err(format!("expression nested deeper than {MAX_NESTING}"));
            }
            self.depth += 1;
            let value = parse(self);
            self.depth -= 1;
            value
        }

        fn atom(&mut self) -> Result<f64, String> {
            self.skip_space();
            match self.chars.peek().copied() {
                Some('(') => {
                    self.chars.next();
                    let value = self.nested(Self::sum)?;
                    self.skip_space();
                    match self.chars.next() {
                        Some(')') => Ok(value),
                        _ => Err("unbalanced parentheses".to_string()),
                    }
                }
                Some('-') => {
                    self.chars.next();
                    Ok(-self.nested(Self::atom)?)
                }
                Some(c) if c.is_ascii_digit() || c == '.' => {
                    let mut text = String::new();
                    while let Some(d) = self.chars.next_if(|d| d.is_ascii_digit() || *d == '.') {
                        text.push(d);
                    }
                    text.parse().map_err(|_| format!("bad number {text:?}"))
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let mut name = String::new();
                    while let Some(d) = self
                        .chars
                        .next_if(|d| d.is_alphanumeric() || *d == '_' || *d == '.')
                    {
                        name.push(d);
                    }
                    (self.lookup)(&name).ok_or_else(|| format!("no numeric value for {name:?}"))
                }
                Some(c) => Err(format!("unexpected {c:?} in expression")),
                None => Err("expression ends too early".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(
        observable: &'a Observable,
        scale: &'a Scale,
        dependencies: &'a [(String, Option<Value>)],
        previous: Option<&'a Value>,
    ) -> StepInput<'a> {
        StepInput {
            observable,
            scale,
            dependencies,
            previous,
        }
    }

    #[test]
    fn core_registers_every_functor() {
        let registry = ComponentRegistry::core();
        for functor in CoreFunctor::ALL {
            assert!(registry.contains(functor.service_call_name()));
        }
        assert_eq!(registry.len(), CoreFunctor::ALL.len());
    }

    #[test]
    fn constant_returns_value() {
        let registry = ComponentRegistry::core();
        let obs: Observable = "t:A".parse().unwrap();
        let scale = Scale::scalar();
        let call = CoreFunctor::ConstantResolver.call().with("value", 4i64);
        let out = registry
            .get(&call.name)
            .unwrap()
            .apply(&call, &input(&obs, &scale, &[], None))
            .unwrap();
        assert_eq!(out, Some(Value::Int(4)));
    }

    #[test]
    fn expression_reads_dependencies() {
        let obs: Observable = "t:A".parse().unwrap();
        let scale = Scale::scalar();
        let deps = vec![
            ("elevation".to_string(), Some(Value::Float(10.0))),
            ("slope".to_string(), Some(Value::Int(2))),
        ];
        let call = CoreFunctor::ExpressionResolver
            .call()
            .with("expression", "(elevation - 4) * slope / 3 + -1");
        let out = ExpressionResolver.apply(&call, &input(&obs, &scale, &deps, None)).unwrap();
        assert_eq!(out, Some(Value::Float(3.0)));
    }

    #[test]
    fn expression_errors_are_reported() {
        let obs: Observable = "t:A".parse().unwrap();
        let scale = Scale::scalar();
        for source in ["1 +", "missing * 2", "(1 + 2", "4 / 0", "1 $ 2"] {
            let call = CoreFunctor::ExpressionResolver.call().with("expression", source);
            assert!(
                ExpressionResolver.apply(&call, &input(&obs, &scale, &[], None)).is_err(),
                "{source} should fail"
            );
        }
    }

    #[test]
    fn deeply_nested_expressions_are_refused() {
        let none = |_: &str| -> Option<f64> { None };
        let limit = expression::MAX_NESTING;
        let parens = format!("{}1{}", "(".repeat(limit), ")".repeat(limit));
        assert_eq!(expression::evaluate(&parens, &none), Ok(1.0));
        assert_eq!(expression::evaluate(&format!("{}2", "-".repeat(limit)), &none), Ok(2.0));

        let deep = 100_000;
        for source in [format!("{}1", "(".repeat(deep)), format!("{}1", "-".repeat(deep))] {
            let err = expression::evaluate(&source, &none).unwrap_err();
            assert!(err.contains("nested deeper"), "{err}");
        }
    }

    #[test]
    fn expression_self_is_previous_step() {
        let obs: Observable = "t:A".parse().unwrap();
        let scale = Scale::scalar();
        let previous = Value::Int(5);
        let call = CoreFunctor::ExpressionResolver.call().with("expression", "self * 2");
        let out = ExpressionResolver
            .apply(&call, &input(&obs, &scale, &[], Some(&previous)))
            .unwrap();
        assert_eq!(out, Some(Value::Float(10.0)));
    }

    #[test]
    fn deferred_produces_nothing() {
        let obs: Observable = "t:A".parse().unwrap();
        let scale = Scale::scalar();
        let call = CoreFunctor::Deferred.call();
        assert_eq!(DeferredResolver.apply(&call, &input(&obs, &scale, &[], None)), Ok(None));
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = ComponentRegistry::core();
        let old = registry.register(Arc::new(ConstantResolver));
        assert!(old.is_some());
        assert_eq!(registry.len(), CoreFunctor::ALL.len());
    }
}
