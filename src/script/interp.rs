use std::{collections::BTreeMap, collections::HashMap, rc::Rc};

use crate::error::ScriptError;

use super::{
    ast::{BinaryOp, Expr, FunctionBody, LogicalOp, Program, Stmt, UnaryOp},
    builtins,
    value::{Closure, Scope, Value},
};

type Result<T> = std::result::Result<T, ScriptError>;

/// Callables shared by every snippet: registered parsers live here and are
/// resolved by bare name after local scopes and before the builtins.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    bindings: HashMap<String, Value>,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }
}

/// Resource limits applied to a single evaluation.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_steps: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_depth: 64,
        }
    }
}

/// Deepest recursion of expression and statement evaluation, across calls.
const MAX_NESTING: usize = 200;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter<'ns> {
    globals: &'ns Namespace,
    limits: Limits,
    steps: usize,
    depth: usize,
    nesting: usize,
    /// Bumped whenever a closure is stored into an existing variable, which
    /// may let it outlive the scope it captured.
    escapes: usize,
}

impl<'ns> Interpreter<'ns> {
    pub fn new(globals: &'ns Namespace, limits: Limits) -> Self {
        Self {
            globals,
            limits,
            steps: 0,
            depth: 0,
            nesting: 0,
            escapes: 0,
        }
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
        self.tick()?;
        self.nested(|this| this.eval_expr(expr, scope))
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(Rc::clone(s))),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Regex(re) => Ok(Value::Regex(Rc::clone(re))),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(value, scope)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(Rc::new(map)))
            }
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (idx, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expr) = exprs.get(idx) {
                        out.push_str(&self.eval(expr, scope)?.to_display());
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Unary { op, expr } => self.eval_unary(*op, expr, scope),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                Ok(binary(*op, &lhs, &rhs))
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let settled = match op {
                    LogicalOp::And => !lhs.truthy(),
                    LogicalOp::Or => lhs.truthy(),
                    LogicalOp::Nullish => !lhs.is_nullish(),
                };
                if settled {
                    Ok(lhs)
                } else {
                    self.eval(rhs, scope)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { name, op, value } => {
                let current = match op {
                    Some(_) => Some(self.lookup(name, scope)?),
                    None => None,
                };
                let rhs = self.eval(value, scope)?;
                let value = match (op, current) {
                    (Some(op), Some(current)) => binary(*op, &current, &rhs),
                    _ => rhs,
                };
                self.store(name, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Update {
                name,
                delta,
                prefix,
            } => {
                let old = self.lookup(name, scope)?.to_number();
                let new = old + delta;
                self.store(name, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or_default())
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: Rc::clone(def),
                scope: Rc::clone(scope),
            }))),
        }
    }

    /// Evaluates one link of a member/index/call chain. `None` means a `?.`
    /// link met `null` or `undefined`, which ends the whole chain.
    fn eval_chain(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(target) = self.chain_target(object, *optional, scope)? else {
                    return Ok(None);
                };
                get_property(&target, property).map(Some)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let Some(target) = self.chain_target(object, *optional, scope)? else {
                    return Ok(None);
                };
                let index = self.eval(index, scope)?;
                get_index(&target, &index).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                if let Expr::Member {
                    object,
                    property,
                    optional: member_optional,
                } = callee.as_ref()
                {
                    let Some(target) = self.chain_target(object, *member_optional, scope)? else {
                        return Ok(None);
                    };
                    if *optional
                        && matches!(&target, Value::Object(map)
                            if map.get(property.as_str()).is_none_or(Value::is_nullish))
                    {
                        return Ok(None);
                    }
                    let args = self.eval_args(args, scope)?;
                    return match (object.as_ref(), target) {
                        (Expr::Ident(name), Value::Array(items)) if property == "push" => {
                            self.push(name, items, args, scope).map(Some)
                        }
                        (_, target) => self.call_method(&target, property, args).map(Some),
                    };
                }
                let Some(callee_value) = self.eval_chain(callee, scope)? else {
                    return Ok(None);
                };
                if *optional && callee_value.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_args(args, scope)?;
                if !callee_value.is_callable() {
                    return Err(ScriptError::type_error(format!(
                        "{} is not a function",
                        describe_callee(callee)
                    )));
                }
                self.call(&callee_value, args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    fn chain_target(
        &mut self,
        object: &Expr,
        optional: bool,
        scope: &Rc<Scope>,
    ) -> Result<Option<Value>> {
        self.tick()?;
        let target = self.nested(|this| this.eval_chain(object, scope))?;
        Ok(target.filter(|value| !(optional && value.is_nullish())))
    }

    /// Arrays are values, so `name.push(...)` rebinds `name` to the grown
    /// array. The variable's handle is dropped first so the append usually
    /// happens in place.
    fn push(
        &mut self,
        name: &str,
        mut items: Rc<Vec<Value>>,
        args: Vec<Value>,
        scope: &Rc<Scope>,
    ) -> Result<Value> {
        if !scope.assign(name, Value::Undefined) {
            return Err(ScriptError::type_error(format!("cannot push to {name}")));
        }
        if args.iter().any(Value::holds_closure) {
            self.escapes += 1;
        }
        Rc::make_mut(&mut items).extend(args);
        let len = items.len();
        scope.assign(name, Value::Array(items));
        Ok(Value::Number(len as f64))
    }

    fn store(&mut self, name: &str, value: Value, scope: &Rc<Scope>) -> Result<()> {
        if value.holds_closure() {
            self.escapes += 1;
        }
        if scope.assign(name, value) {
            Ok(())
        } else {
            Err(ScriptError::Reference(name.to_string()))
        }
    }

    /// Runs top-level statements; a top-level `return` yields its value.
    pub fn run(&mut self, program: &Program, scope: &Rc<Scope>) -> Result<Option<Value>> {
        match self.exec_block(&program.body, scope)? {
            Flow::Return(value) => Ok(Some(value)),
            Flow::Normal | Flow::Break | Flow::Continue => Ok(None),
        }
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args),
            other => Err(ScriptError::type_error(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    fn call_method(&mut self, target: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
        if let Value::Object(map) = target {
            return match map.get(name) {
                Some(f) if f.is_callable() => self.call(&f.clone(), args),
                _ => Err(ScriptError::type_error(format!("{name} is not a function"))),
            };
        }
        if target.is_nullish() {
            return Err(ScriptError::type_error(format!(
                "cannot read properties of {} (reading '{name}')",
                target.type_name()
            )));
        }
        builtins::call_method(self, target, name, args)
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value> {
        if self.depth >= self.limits.max_depth {
            return Err(ScriptError::Depth(self.limits.max_depth));
        }
        self.depth += 1;
        let escapes = self.escapes;
        let scope = Scope::child(&closure.scope);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            scope.declare(param, args.next().unwrap_or_default());
        }
        let result = match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => self.exec_block(body, &scope).map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal | Flow::Break | Flow::Continue => Value::Undefined,
            }),
        };
        self.release(&scope, escapes, result.as_ref().ok());
        self.depth -= 1;
        result
    }

    /// Clears a finished scope unless a closure that may capture it got out,
    /// either through `outcome` or by assignment to an outer variable.
    fn release(&self, scope: &Scope, escapes: usize, outcome: Option<&Value>) {
        if self.escapes == escapes && !outcome.is_some_and(Value::holds_closure) {
            scope.clear();
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    fn eval_unary(&mut self, op: UnaryOp, expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
        if op == UnaryOp::TypeOf {
            // `typeof missing` is "undefined" rather than a reference error.
            if let Expr::Ident(name) = expr {
                return Ok(match self.lookup(name, scope) {
                    Ok(value) => Value::str(value.type_of()),
                    Err(ScriptError::Reference(_)) => Value::str("undefined"),
                    Err(err) => return Err(err),
                });
            }
        }
        let value = self.eval(expr, scope)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::TypeOf => Value::str(value.type_of()),
        })
    }

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> Result<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::global(name).ok_or_else(|| ScriptError::Reference(name.to_string()))
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow> {
        // Function declarations are visible throughout their block.
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Closure {
                        def: Rc::clone(def),
                        scope: Rc::clone(scope),
                    };
                    scope.declare(name, Value::Function(Rc::new(closure)));
                }
            }
        }
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Runs `body` in a fresh child scope, then releases that scope.
    fn exec_scoped(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow> {
        let escapes = self.escapes;
        let inner = Scope::child(scope);
        let flow = self.exec_block(body, &inner);
        let outcome = match &flow {
            Ok(Flow::Return(value)) => Some(value),
            _ => None,
        };
        self.release(&inner, escapes, outcome);
        flow
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow> {
        self.tick()?;
        self.nested(|this| this.exec_stmt(stmt, scope))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow> {
        match stmt {
            Stmt::Declare(decls) => {
                for (name, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    scope.declare(name, value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, scope)?.truthy() {
                    if let Some(flow) = self.iterate(body, scope)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let escapes = self.escapes;
                let inner = Scope::child(scope);
                let flow = self.exec_for(
                    init.as_deref(),
                    test.as_ref(),
                    update.as_ref(),
                    body,
                    &inner,
                );
                let outcome = match &flow {
                    Ok(Flow::Return(value)) => Some(value),
                    _ => None,
                };
                self.release(&inner, escapes, outcome);
                flow
            }
            Stmt::ForOf {
                name,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, scope)? {
                    Value::Array(items) => items.to_vec(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "{} is not iterable",
                            other.type_name()
                        )));
                    }
                };
                for item in items {
                    let escapes = self.escapes;
                    let inner = Scope::child(scope);
                    inner.declare(name, item);
                    let step = self.iterate(body, &inner);
                    let outcome = match &step {
                        Ok(Some(Flow::Return(value))) => Some(value),
                        _ => None,
                    };
                    self.release(&inner, escapes, outcome);
                    if let Some(flow) = step? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Block(body) => self.exec_scoped(body, scope),
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Result<Flow> {
        if let Some(init) = init {
            self.exec(init, scope)?;
        }
        loop {
            if let Some(test) = test {
                if !self.eval(test, scope)?.truthy() {
                    return Ok(Flow::Normal);
                }
            }
            if let Some(flow) = self.iterate(body, scope)? {
                return Ok(flow);
            }
            if let Some(update) = update {
                self.eval(update, scope)?;
            }
        }
    }

    /// One pass through a loop body; `Some` ends the loop with that flow.
    fn iterate(&mut self, body: &Stmt, scope: &Rc<Scope>) -> Result<Option<Flow>> {
        Ok(match self.exec(body, scope)? {
            Flow::Break => Some(Flow::Normal),
            Flow::Return(value) => Some(Flow::Return(value)),
            Flow::Normal | Flow::Continue => None,
        })
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING {
            return Err(ScriptError::Nesting(MAX_NESTING));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    pub(super) fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::Budget(self.limits.max_steps));
        }
        Ok(())
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { property, .. } => property.clone(),
        _ => "expression".to_string(),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Add => {
            let string_like = |v: &Value| {
                matches!(
                    v,
                    Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Regex(_)
                )
            };
            if string_like(lhs) || string_like(rhs) {
                Value::str(format!("{}{}", lhs.to_display(), rhs.to_display()))
            } else {
                Value::Number(lhs.to_number() + rhs.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinaryOp::Lt => Value::Bool(matches!(lhs.compare(rhs), Some(Less))),
        BinaryOp::Le => Value::Bool(matches!(lhs.compare(rhs), Some(Less | Equal))),
        BinaryOp::Gt => Value::Bool(matches!(lhs.compare(rhs), Some(Greater))),
        BinaryOp::Ge => Value::Bool(matches!(lhs.compare(rhs), Some(Greater | Equal))),
        BinaryOp::LooseEq => Value::Bool(lhs.loose_eq(rhs)),
        BinaryOp::LooseNe => Value::Bool(!lhs.loose_eq(rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs.strict_eq(rhs)),
        BinaryOp::StrictNe => Value::Bool(!lhs.strict_eq(rhs)),
    }
}

pub(super) fn get_property(target: &Value, name: &str) -> Result<Value> {
    match target {
        Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
            "cannot read properties of {} (reading '{name}')",
            target.type_name()
        ))),
        Value::Str(s) if name == "length" => Ok(Value::Number(s.encode_utf16().count() as f64)),
        Value::Array(items) if name == "length" => Ok(Value::Number(items.len() as f64)),
        Value::Array(items) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get(idx).cloned())
            .unwrap_or_default()),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or_default()),
        Value::Regex(re) => Ok(match name {
            "source" => Value::str(re.source.as_str()),
            "flags" => Value::str(re.flags.as_str()),
            "global" => Value::Bool(re.global()),
            _ => Value::Undefined,
        }),
        _ => Ok(Value::Undefined),
    }
}

fn get_index(target: &Value, index: &Value) -> Result<Value> {
    if let Value::Number(n) = index {
        let valid = *n >= 0.0 && n.fract() == 0.0;
        match target {
            Value::Array(items) => {
                return Ok(valid
                    .then(|| items.get(*n as usize).cloned())
                    .flatten()
                    .unwrap_or_default());
            }
            Value::Str(s) => {
                return Ok(valid
                    .then(|| s.chars().nth(*n as usize))
                    .flatten()
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or_default());
            }
            _ => {}
        }
    }
    get_property(target, &index.to_display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{parse_expression, parse_program};

    fn eval(src: &str) -> Result<Value> {
        let ns = Namespace::default();
        let expr = parse_expression(src)?;
        Interpreter::new(&ns, Limits::default()).eval(&expr, &Rc::new(Scope::default()))
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert!(eval("1 + 2 * 3 == 7").unwrap().strict_eq(&Value::Bool(true)));
        assert!(eval("'150' > 100").unwrap().strict_eq(&Value::Bool(true)));
        assert!(eval("'b' > 'a'").unwrap().strict_eq(&Value::Bool(true)));
    }

    #[test]
    fn string_concatenation_wins_over_addition() {
        assert_eq!(eval("'8' + 1").unwrap().to_display(), "81");
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval("null || 'fallback'").unwrap().to_display(), "fallback");
        assert!(matches!(eval("0 && missing").unwrap(), Value::Number(n) if n == 0.0));
    }

    #[test]
    fn undefined_identifier_is_a_reference_error() {
        assert_eq!(
            eval("matmul").unwrap_err(),
            ScriptError::Reference("matmul".into())
        );
    }

    #[test]
    fn typeof_undeclared_is_undefined() {
        assert_eq!(eval("typeof nothing").unwrap().to_display(), "undefined");
    }

    #[test]
    fn reading_from_null_is_a_type_error() {
        assert!(matches!(eval("null[0]"), Err(ScriptError::Type(_))));
    }

    #[test]
    fn closures_capture_their_scope() {
        let ns = Namespace::default();
        let program = parse_program(
            "function outer(n) { const add = x => x + n; return add(1); } return outer(41);",
        )
        .unwrap();
        let result = Interpreter::new(&ns, Limits::default())
            .run(&program, &Rc::new(Scope::default()))
            .unwrap();
        assert_eq!(result.unwrap().to_display(), "42");
    }

    #[test]
    fn globals_are_resolved_after_locals() {
        let mut ns = Namespace::default();
        ns.insert("limit", Value::Number(3.0));
        let expr = parse_expression("limit * 2").unwrap();
        let value = Interpreter::new(&ns, Limits::default())
            .eval(&expr, &Rc::new(Scope::default()))
            .unwrap();
        assert_eq!(value.to_display(), "6");
    }

    #[test]
    fn runaway_recursion_hits_the_depth_limit() {
        let ns = Namespace::default();
        let program = parse_program("function f(x) { return f(x); } return f(1);").unwrap();
        let err = Interpreter::new(&ns, Limits::default())
            .run(&program, &Rc::new(Scope::default()))
            .unwrap_err();
        assert_eq!(err, ScriptError::Depth(64));
    }

    fn run(src: &str) -> Result<Value> {
        let ns = Namespace::default();
        let program = parse_program(src)?;
        let value = Interpreter::new(&ns, Limits::default())
            .run(&program, &Rc::new(Scope::default()))?;
        Ok(value.unwrap_or_default())
    }

    #[test]
    fn for_loop_with_update_and_compound_assignment() {
        let value = run(
            "const f = x => { let s = ''; for (let i = 0; i < 3; i++) { s += i; } return s; }; return f();",
        )
        .unwrap();
        assert_eq!(value.to_display(), "012");
    }

    #[test]
    fn for_of_with_push_break_and_continue() {
        let value = run(
            "const out = [];
             for (const d of '8x384x1024x3'.split('x')) {
                 if (d === '384') continue;
                 if (d === '3') break;
                 out.push(parseInt(d, 10));
             }
             return out;",
        )
        .unwrap();
        assert_eq!(value.to_json(), serde_json::json!([8, 1024]));
    }

    #[test]
    fn while_loop_counts_down() {
        let value = run("let n = 5; let steps = 0; while (n > 0) { n -= 2; ++steps; } return steps;")
            .unwrap();
        assert_eq!(value.to_display(), "3");
    }

    #[test]
    fn infinite_loops_exhaust_the_budget() {
        assert_eq!(run("while (true) {}").unwrap_err(), ScriptError::Budget(100_000));
        assert_eq!(run("for (;;);").unwrap_err(), ScriptError::Budget(100_000));
    }

    #[test]
    fn return_inside_a_loop_leaves_the_function() {
        let value = run(
            "function first(xs) { for (const x of xs) { if (x > 1) return x; } return -1; } return first([1, 5, 9]);",
        )
        .unwrap();
        assert_eq!(value.to_display(), "5");
    }

    #[test]
    fn update_returns_old_or_new_value() {
        let value = run("let i = 1; const a = i++; const b = ++i; return [a, b, i];").unwrap();
        assert_eq!(value.to_display(), "1,3,3");
    }

    #[test]
    fn template_literals_interpolate() {
        assert_eq!(
            eval("`${[8, 384].join('x')} of ${typeof 1}`")
                .unwrap()
                .to_display(),
            "8x384 of number"
        );
        assert_eq!(eval("`a${`b${1 + 1}`}c`").unwrap().to_display(), "ab2c");
    }

    #[test]
    fn optional_chaining_short_circuits() {
        assert!(matches!(eval("null?.a.b.c").unwrap(), Value::Undefined));
        assert!(matches!(eval("({a: null}).a?.[0]").unwrap(), Value::Undefined));
        assert!(matches!(eval("({}).f?.()").unwrap(), Value::Undefined));
        assert!(matches!(eval("undefined?.(1)").unwrap(), Value::Undefined));
        assert_eq!(eval("({a: {b: 2}}).a?.b").unwrap().to_display(), "2");
        assert!(matches!(eval("null.a"), Err(ScriptError::Type(_))));
    }

    #[test]
    fn nullish_coalescing_keeps_falsy_values() {
        assert_eq!(eval("0 ?? 1").unwrap().to_display(), "0");
        assert_eq!(eval("null ?? 'dflt'").unwrap().to_display(), "dflt");
    }

    #[test]
    fn deep_recursion_with_nested_expressions_is_an_error() {
        let ns = Namespace::default();
        let program = parse_program(
            "function f(n) { return n <= 0 ? 0 : 1 + f(n - 1); } return f(1000);",
        )
        .unwrap();
        let limits = Limits {
            max_steps: 1_000_000,
            max_depth: 10_000,
        };
        let err = Interpreter::new(&ns, limits)
            .run(&program, &Rc::new(Scope::default()))
            .unwrap_err();
        assert_eq!(err, ScriptError::Nesting(MAX_NESTING));
    }

    #[test]
    fn call_scopes_are_released_after_the_call() {
        let ns = Namespace::default();
        let program = parse_program(
            "function p(x) { const f = s => s; function g() { return x; } { const h = () => x; } return 1; }",
        )
        .unwrap();
        let scope = Rc::new(Scope::default());
        let mut interp = Interpreter::new(&ns, Limits::default());
        interp.run(&program, &scope).unwrap();
        let p = scope.lookup("p").unwrap();
        let items = Rc::new(vec![Value::Number(1.0)]);
        for _ in 0..3 {
            interp.call(&p, vec![Value::Array(Rc::clone(&items))]).unwrap();
        }
        assert_eq!(Rc::strong_count(&items), 1);
    }

    #[test]
    fn returned_closures_keep_their_bindings() {
        let value = run(
            "function outer(n) { const add = x => x + n; return add; } const add = outer(41); return add(1);",
        )
        .unwrap();
        assert_eq!(value.to_display(), "42");
        let value = run(
            "let saved; function keep(n) { const f = () => n; saved = f; return 0; } keep(5); return saved();",
        )
        .unwrap();
        assert_eq!(value.to_display(), "5");
        let value = run(
            "function pair(n) { const get = () => n; return { get }; } return pair(7).get();",
        )
        .unwrap();
        assert_eq!(value.to_display(), "7");
    }

    #[test]
    fn step_budget_is_enforced() {
        let ns = Namespace::default();
        let expr = parse_expression("[1, 2, 3, 4, 5, 6, 7, 8].map(x => x * 2)").unwrap();
        let limits = Limits {
            max_steps: 10,
            max_depth: 8,
        };
        let err = Interpreter::new(&ns, limits)
            .eval(&expr, &Rc::new(Scope::default()))
            .unwrap_err();
        assert_eq!(err, ScriptError::Budget(10));
    }
}
