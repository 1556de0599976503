//! Named parser snippets compiled into callables that filters can invoke by
//! bare name.

mod store;

use std::{rc::Rc, sync::LazyLock};

use regex::Regex;

pub use store::ParserStore;

use crate::{
    error::{ParserCompileError, ScriptError},
    script::{Interpreter, Limits, Namespace, Scope, Value, parse_expression, parse_program},
};

pub const TENSOR_SHAPE_NAME: &str = "tensorShape";

pub const TENSOR_SHAPE_SOURCE: &str = r"function tensorShape(x) {
    const match = x.match(/Tensor\[(.*?)\]/);
    if (!match) return null;
    const parts = match[1].split('|');
    const shapeStr = parts[0];
    return shapeStr.split('x').map(dim => parseInt(dim, 10));
}";

static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"function\s+([A-Za-z0-9_$]+)\s*\(").expect("valid regex"));
static DECLARED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:const|let|var)\s+([A-Za-z0-9_$]+)\s*=").expect("valid regex")
});
static BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:const|let|var)\s+)?([A-Za-z_$][A-Za-z0-9_$]*)\s*=(?:[^>=]|$)")
        .expect("valid regex")
});

/// Name a snippet declares for itself: the first `function name(`, else the
/// first `const|let|var name =`.
pub fn detect_name(source: &str) -> Option<String> {
    FUNCTION_NAME
        .captures(source)
        .or_else(|| DECLARED_NAME.captures(source))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Clone, Debug)]
pub struct ParserEntry {
    pub name: String,
    pub source: String,
}

#[derive(Default)]
pub struct ParserRegistry {
    entries: Vec<ParserEntry>,
    namespace: Namespace,
    limits: Limits,
}

impl ParserRegistry {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Callables visible to filters and to other parsers.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Compile `source` and bind it under `name`. On failure nothing changes.
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), ParserCompileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ParserCompileError::EmptyName);
        }
        let callable = match self.compile(name, source) {
            Ok(callable) => callable,
            Err(err) => {
                tracing::warn!(parser = name, error = %err, "parser failed to compile");
                return Err(err);
            }
        };
        if let Some(old) = self.namespace.remove(name) {
            retire(old);
        }
        self.namespace.insert(name, callable);
        let entry = ParserEntry {
            name: name.to_string(),
            source: source.to_string(),
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        tracing::debug!(parser = name, "parser registered");
        Ok(())
    }

    fn compile(&self, name: &str, source: &str) -> Result<Value, ParserCompileError> {
        let script_err = |source: ScriptError| ParserCompileError::Script {
            name: name.to_string(),
            source,
        };
        let trimmed = source.trim();
        let mut interp = Interpreter::new(&self.namespace, self.limits);
        let scope = Rc::new(Scope::default());

        let binding = if trimmed.starts_with("function") {
            Some(name.to_string())
        } else if trimmed.contains("=>") {
            BINDING
                .captures(trimmed)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        } else {
            None
        };

        let value = match binding {
            Some(binding) => {
                let program = parse_program(trimmed).map_err(script_err)?;
                interp.run(&program, &scope).map_err(script_err)?;
                scope
                    .lookup(&binding)
                    .or_else(|| {
                        program
                            .first_function_name()
                            .and_then(|declared| scope.lookup(declared))
                    })
                    .ok_or_else(|| ParserCompileError::MissingBinding {
                        name: name.to_string(),
                        binding,
                    })?
            }
            None => {
                let expr = parse_expression(trimmed).map_err(script_err)?;
                interp.eval(&expr, &scope).map_err(script_err)?
            }
        };

        if !value.is_callable() {
            return Err(ParserCompileError::NotCallable {
                name: name.to_string(),
                got: value.type_name(),
            });
        }
        Ok(value)
    }

    /// The compiled callable bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.namespace.get(name)
    }

    /// The registered source for `name`.
    pub fn entry(&self, name: &str) -> Option<&ParserEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParserEntry> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        if let Some(old) = self.namespace.remove(name) {
            retire(old);
        }
        tracing::debug!(parser = name, "parser removed");
        Some(self.entries.remove(idx))
    }

    /// Registered parsers in first-registration order.
    pub fn list(&self) -> &[ParserEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run a parser on a sample string, returning the result as JSON text.
    pub fn test(&self, name: &str, input: &str) -> Result<String, ScriptError> {
        let callable = self
            .get(name)
            .ok_or_else(|| ScriptError::Reference(name.to_string()))?;
        let result =
            Interpreter::new(&self.namespace, self.limits).call(callable, vec![Value::str(input)])?;
        Ok(match result {
            Value::Undefined => "undefined".to_string(),
            other => other.to_json().to_string(),
        })
    }

    /// Registers `tensorShape` when nothing else is registered.
    pub fn seed_defaults_if_empty(&mut self) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.register(TENSOR_SHAPE_NAME, TENSOR_SHAPE_SOURCE).is_ok()
    }

    /// Registers every stored parser, skipping (and logging) the ones that
    /// fail to compile.
    pub fn load_from(&mut self, store: &ParserStore) -> usize {
        store
            .records()
            .iter()
            .filter(|record| self.register(&record.name, &record.code).is_ok())
            .count()
    }
}

/// A parser's defining scope usually binds the parser itself; clearing it
/// lets an unbound parser be freed.
fn retire(callable: Value) {
    if let Value::Function(closure) = callable {
        closure.scope.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ParserRegistry {
        ParserRegistry::new(Limits::default())
    }

    #[test]
    fn tensor_shape_seed_parses_dimensions() {
        let mut reg = registry();
        assert!(reg.seed_defaults_if_empty());
        assert_eq!(
            reg.test("tensorShape", "Tensor[8x384x1024|BFLOAT16]").unwrap(),
            "[8,384,1024]"
        );
        assert_eq!(reg.test("tensorShape", "scalar").unwrap(), "null");
    }

    #[test]
    fn seed_is_skipped_when_parsers_exist() {
        let mut reg = registry();
        reg.register("double", "x => x * 2").unwrap();
        assert!(!reg.seed_defaults_if_empty());
        assert!(reg.get(TENSOR_SHAPE_NAME).is_none());
    }

    #[test]
    fn accepts_every_source_shape() {
        let mut reg = registry();
        reg.register("decl", "function decl(x) { return x + '!'; }").unwrap();
        reg.register("bound", "const bound = x => x.length").unwrap();
        reg.register("anon", "x => x.toUpperCase()").unwrap();
        reg.register("expr", "(function (x) { return 1; })").unwrap();
        assert_eq!(reg.test("decl", "hi").unwrap(), "\"hi!\"");
        assert_eq!(reg.test("bound", "abc").unwrap(), "3");
        assert_eq!(reg.test("anon", "abc").unwrap(), "\"ABC\"");
        assert_eq!(reg.test("expr", "abc").unwrap(), "1");
    }

    #[test]
    fn declaration_under_another_name_still_registers() {
        let mut reg = registry();
        reg.register("shape", "function parseShape(x) { return 1; }").unwrap();
        assert_eq!(reg.test("shape", "").unwrap(), "1");
    }

    #[test]
    fn failed_compile_leaves_registry_unchanged() {
        let mut reg = registry();
        reg.register("p", "x => 1").unwrap();
        assert!(matches!(
            reg.register("p", "x => ("),
            Err(ParserCompileError::Script { .. })
        ));
        assert!(matches!(
            reg.register("q", "42"),
            Err(ParserCompileError::NotCallable { got: "number", .. })
        ));
        assert_eq!(reg.entry("p").unwrap().source, "x => 1");
        assert!(reg.get("q").is_none());
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn re_registering_keeps_position() {
        let mut reg = registry();
        reg.register("a", "x => 1").unwrap();
        reg.register("b", "x => 2").unwrap();
        reg.register("a", "x => 3").unwrap();
        let names: Vec<_> = reg.list().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reg.test("a", "").unwrap(), "3");
    }

    #[test]
    fn parsers_call_each_other_by_name() {
        let mut reg = registry();
        reg.seed_defaults_if_empty();
        reg.register("rank", "x => tensorShape(x).length").unwrap();
        assert_eq!(reg.test("rank", "Tensor[1x2x3|F32]").unwrap(), "3");
    }

    #[test]
    fn removed_parser_is_unbound() {
        let mut reg = registry();
        reg.register("a", "x => 1").unwrap();
        assert!(reg.remove("a").is_some());
        assert!(reg.namespace().get("a").is_none());
        assert!(matches!(reg.test("a", ""), Err(ScriptError::Reference(_))));
    }

    #[test]
    fn get_returns_the_callable() {
        let mut reg = registry();
        reg.register("double", "x => x * 2").unwrap();
        let callable = reg.get("double").unwrap();
        assert!(callable.is_callable());
        let result = Interpreter::new(reg.namespace(), reg.limits())
            .call(callable, vec![Value::Number(21.0)])
            .unwrap();
        assert_eq!(result.to_display(), "42");
        assert_eq!(reg.entry("double").unwrap().source, "x => x * 2");
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn repeated_calls_do_not_retain_arguments() {
        let mut reg = registry();
        reg.register("p", "function p(x) { const f = s => s; return 1; }")
            .unwrap();
        let items = Rc::new(vec![Value::str("a")]);
        let callable = reg.get("p").unwrap();
        let mut interp = Interpreter::new(reg.namespace(), reg.limits());
        for _ in 0..3 {
            interp
                .call(callable, vec![Value::Array(Rc::clone(&items))])
                .unwrap();
        }
        assert_eq!(Rc::strong_count(&items), 1);
    }

    #[test]
    fn replaced_parsers_are_freed() {
        let mut reg = registry();
        reg.register("p", "function p(x) { return 1; }").unwrap();
        let Some(Value::Function(old)) = reg.get("p").cloned() else {
            panic!("expected a closure");
        };
        reg.register("p", "x => 2").unwrap();
        assert_eq!(Rc::strong_count(&old), 1);
        assert_eq!(reg.test("p", "").unwrap(), "2");
    }

    #[test]
    fn detects_declared_names() {
        assert_eq!(detect_name("function tensorDtype(x) {}").as_deref(), Some("tensorDtype"));
        assert_eq!(detect_name("const rank = x => 1").as_deref(), Some("rank"));
        assert_eq!(detect_name("x => 1"), None);
    }
}
