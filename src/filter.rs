use std::{collections::HashMap, rc::Rc};

use serde_json::Value as Json;

use crate::{
    error::{FilterEvalError, ScriptError},
    model::Event,
    parsers::ParserRegistry,
    script::{Expr, Interpreter, Scope, Value, parse_expression},
};

/// How a filter's result is judged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterShape {
    /// Text containing both `(` and `)`: anything but `true` rejects.
    Call,
    /// Anything else: a failure falls back to a substring match.
    Bare,
}

impl FilterShape {
    pub fn of(text: &str) -> Self {
        if text.contains('(') && text.contains(')') {
            FilterShape::Call
        } else {
            FilterShape::Bare
        }
    }
}

#[derive(Debug)]
pub struct CompiledFilter {
    text: String,
    shape: FilterShape,
    parsed: Result<Expr, ScriptError>,
}

impl CompiledFilter {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            shape: FilterShape::of(text),
            parsed: parse_expression(text),
        }
    }

    pub fn shape(&self) -> FilterShape {
        self.shape
    }

    /// Evaluates against one cell with `value` bound to the cell text.
    pub fn eval(&self, cell: &str, parsers: &ParserRegistry) -> Result<Value, FilterEvalError> {
        let wrap = |source| FilterEvalError {
            text: self.text.clone(),
            source,
        };
        let expr = self.parsed.as_ref().map_err(|err| wrap(err.clone()))?;
        let scope = Rc::new(Scope::default());
        scope.declare("value", Value::str(cell));
        Interpreter::new(parsers.namespace(), parsers.limits())
            .eval(expr, &scope)
            .map_err(wrap)
    }

    pub fn keep(&self, cell: &str, parsers: &ParserRegistry) -> bool {
        match (self.eval(cell, parsers), self.shape) {
            (Ok(result), _) => result.strict_eq(&Value::Bool(true)),
            (Err(err), FilterShape::Call) => {
                tracing::trace!(error = %err, "filter rejected cell");
                false
            }
            (Err(_), FilterShape::Bare) => cell
                .to_lowercase()
                .contains(&self.text.to_lowercase()),
        }
    }
}

/// Compiles per-column filter text once per distinct text.
#[derive(Debug, Default)]
pub struct FilterEngine {
    cache: HashMap<String, Rc<CompiledFilter>>,
}

impl FilterEngine {
    /// `None` for blank text, which filters nothing.
    pub fn compile(&mut self, text: &str) -> Option<Rc<CompiledFilter>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let compiled = self
            .cache
            .entry(text.to_string())
            .or_insert_with(|| Rc::new(CompiledFilter::new(text)));
        Some(Rc::clone(compiled))
    }

    pub fn keep_cell(&mut self, text: &str, cell: &str, parsers: &ParserRegistry) -> bool {
        match self.compile(text) {
            Some(filter) => filter.keep(cell, parsers),
            None => true,
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Row-level predicate applied on top of the column filters.
#[derive(Debug)]
pub struct CommonFilter {
    text: String,
    expr: Expr,
}

impl CommonFilter {
    /// Blank text clears the filter; a syntax error is returned so the
    /// caller can keep the previous one.
    pub fn compile(text: &str) -> Result<Option<Self>, FilterEvalError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let expr = parse_expression(text).map_err(|source| FilterEvalError {
            text: text.to_string(),
            source,
        })?;
        Ok(Some(Self {
            text: text.to_string(),
            expr,
        }))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The expression may evaluate to a callable, which then receives the
    /// row. Evaluation errors keep the row.
    pub fn keep(&self, row: &Event, parsers: &ParserRegistry) -> bool {
        let row = row_value(row);
        let scope = Rc::new(Scope::default());
        scope.declare("row", row.clone());
        let mut interp = Interpreter::new(parsers.namespace(), parsers.limits());
        let result = interp.eval(&self.expr, &scope).and_then(|value| {
            if value.is_callable() {
                interp.call(&value, vec![row])
            } else {
                Ok(value)
            }
        });
        match result {
            Ok(value) => value.strict_eq(&Value::Bool(true)),
            Err(err) => {
                tracing::trace!(filter = %self.text, error = %err, "common filter error, row kept");
                true
            }
        }
    }
}

fn row_value(row: &Event) -> Value {
    Value::Object(Rc::new(
        row.iter()
            .map(|(k, v): (&String, &Json)| (k.clone(), Value::from_json(v)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Limits;
    use serde_json::json;

    fn parsers() -> ParserRegistry {
        let mut reg = ParserRegistry::new(Limits::default());
        reg.seed_defaults_if_empty();
        reg
    }

    fn event(value: Json) -> Event {
        match value {
            Json::Object(map) => map,
            _ => Event::new(),
        }
    }

    #[test]
    fn parser_call_filters_by_shape() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        let cell = "Tensor[8x384x1024|BFLOAT16]";
        assert!(engine.keep_cell("tensorShape(value)[0] == 8", cell, &reg));
        assert!(!engine.keep_cell("tensorShape(value)[0] == 4", cell, &reg));
    }

    #[test]
    fn call_shape_errors_reject() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        assert!(!engine.keep_cell("missing(value)", "matmul", &reg));
        assert!(!engine.keep_cell("tensorShape(value)[0] == 8", "no tensor here", &reg));
    }

    #[test]
    fn bare_text_falls_back_to_substring() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        assert!(engine.keep_cell("MatMul", "ttnn.matmul", &reg));
        assert!(!engine.keep_cell("softmax", "ttnn.matmul", &reg));
    }

    #[test]
    fn bare_expression_must_be_strictly_true() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        assert!(engine.keep_cell("value > 100", "150", &reg));
        assert!(!engine.keep_cell("value > 100", "50", &reg));
        assert!(!engine.keep_cell("value.length", "abc", &reg));
    }

    #[test]
    fn blank_text_filters_nothing() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        assert!(engine.keep_cell("   ", "anything", &reg));
        assert_eq!(engine.cached(), 0);
    }

    #[test]
    fn compiled_filters_are_cached_by_text() {
        let mut engine = FilterEngine::default();
        let a = engine.compile("value == 'x'").unwrap();
        let b = engine.compile(" value == 'x' ").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.shape(), FilterShape::Bare);
    }

    #[test]
    fn common_filter_accepts_callables_and_expressions() {
        let reg = parsers();
        let row = event(json!({"operation": "matmul", "duration": 12}));
        let lambda = CommonFilter::compile("r => r.duration > 10").unwrap().unwrap();
        assert!(lambda.keep(&row, &reg));
        let expr = CommonFilter::compile("row.operation === 'add'").unwrap().unwrap();
        assert!(!expr.keep(&row, &reg));
    }

    #[test]
    fn common_filter_keeps_rows_on_error() {
        let reg = parsers();
        let row = event(json!({"operation": "matmul"}));
        let filter = CommonFilter::compile("row.shape.length > 2").unwrap().unwrap();
        assert!(filter.keep(&row, &reg));
    }

    #[test]
    fn deeply_nested_filters_fail_without_crashing() {
        let reg = parsers();
        let mut engine = FilterEngine::default();
        let nested = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));
        assert!(!engine.keep_cell(&nested, "1", &reg));
        assert!(engine.keep_cell(&nested, &nested, &reg));

        let chain = format!("value == 1{}", "+1".repeat(50_000));
        assert!(!engine.keep_cell(&chain, "1", &reg));

        let call = format!("String({}1{})", "(".repeat(1000), ")".repeat(1000));
        assert_eq!(engine.compile(&call).unwrap().shape(), FilterShape::Call);
        assert!(!engine.keep_cell(&call, "1", &reg));

        assert!(CommonFilter::compile(&nested).is_err());
    }

    #[test]
    fn common_filter_syntax_error_is_reported() {
        assert!(CommonFilter::compile("row.duration >").is_err());
        assert!(CommonFilter::compile("  ").unwrap().is_none());
    }
}
