use std::rc::Rc;

use crate::error::ScriptError;

use super::{
    ast::{BinaryOp, Expr, FunctionBody, FunctionDef, LogicalOp, Program, Stmt, UnaryOp},
    lexer::{Tok, Token, tokenize},
    value::RegexValue,
};

const RESERVED: &[&str] = &[
    "function",
    "return",
    "const",
    "let",
    "var",
    "if",
    "else",
    "for",
    "while",
    "break",
    "continue",
    "true",
    "false",
    "null",
    "undefined",
    "typeof",
];

/// Deepest syntactic nesting accepted. Longer operator and member chains
/// count one level per link, so no tree is taller than this.
const MAX_NESTING: usize = 128;

/// Parse a single expression; the whole input must be consumed.
pub fn parse_expression(src: &str) -> Result<Expr, ScriptError> {
    let mut parser = Parser::new(tokenize(src)?);
    let expr = parser.expression()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a sequence of statements.
pub fn parse_program(src: &str) -> Result<Program, ScriptError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::syntax(
                self.offset(),
                format!("nesting deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.descend()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected `{p}`")))
        }
    }

    fn expect_eof(&self) -> Result<(), ScriptError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("expected end of input"))
        }
    }

    fn binding_name(&mut self) -> Result<String, ScriptError> {
        match self.peek() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected an identifier")),
        }
    }

    fn unexpected(&self, message: &str) -> ScriptError {
        let found = match self.peek() {
            Tok::Number(n) => format!("number {n}"),
            Tok::Str(s) => format!("string {s:?}"),
            Tok::Ident(w) => format!("`{w}`"),
            Tok::Regex { pattern, .. } => format!("regex /{pattern}/"),
            Tok::Template { .. } => "template literal".to_string(),
            Tok::Punct(p) => format!("`{p}`"),
            Tok::Eof => "end of input".to_string(),
        };
        ScriptError::syntax(self.offset(), format!("{message}, found {found}"))
    }

    // ---- statements -----------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_level)
    }

    fn statement_level(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.is_word("function") {
            self.advance();
            let def = self.function_rest(true)?;
            return Ok(Stmt::Function(def));
        }
        if self.at_declaration() {
            self.advance();
            let decl = self.declaration()?;
            self.eat_punct(";");
            return Ok(decl);
        }
        if self.eat_word("if") {
            self.expect_punct("(")?;
            let test = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.eat_word("else") {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                test,
                then,
                otherwise,
            });
        }
        if self.eat_word("while") {
            self.expect_punct("(")?;
            let test = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::While { test, body });
        }
        if self.eat_word("for") {
            return self.for_statement();
        }
        if self.eat_word("break") {
            self.eat_punct(";");
            return Ok(Stmt::Break);
        }
        if self.eat_word("continue") {
            self.eat_punct(";");
            return Ok(Stmt::Continue);
        }
        if self.eat_word("return") {
            let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                None
            } else {
                Some(self.expression()?)
            };
            self.eat_punct(";");
            return Ok(Stmt::Return(value));
        }
        let expr = self.expression()?;
        self.eat_punct(";");
        Ok(Stmt::Expr(expr))
    }

    fn at_declaration(&self) -> bool {
        self.is_word("const") || self.is_word("let") || self.is_word("var")
    }

    /// Bindings after `const`, `let` or `var`, without the trailing `;`.
    fn declaration(&mut self) -> Result<Stmt, ScriptError> {
        let mut decls = Vec::new();
        loop {
            let name = self.binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                return Ok(Stmt::Declare(decls));
            }
        }
    }

    /// Everything after the `for` keyword: `(init; test; update)` or
    /// `(const name of iterable)`, then the body.
    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect_punct("(")?;
        let declares = self.at_declaration();
        if declares
            && matches!(self.peek_at(1), Tok::Ident(_))
            && matches!(self.peek_at(2), Tok::Ident(w) if w == "of")
        {
            self.advance();
            let name = self.binding_name()?;
            self.advance();
            let iterable = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::ForOf {
                name,
                iterable,
                body,
            });
        }

        let init = if self.is_punct(";") {
            None
        } else if declares {
            self.advance();
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("expected `}`"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    /// Everything after the `function` keyword.
    fn function_rest(&mut self, require_name: bool) -> Result<Rc<FunctionDef>, ScriptError> {
        let name = if require_name || matches!(self.peek(), Tok::Ident(_)) {
            Some(self.binding_name()?)
        } else {
            None
        };
        self.expect_punct("(")?;
        let params = self.param_list()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef { name, params, body }))
    }

    /// Identifiers up to and including the closing `)`.
    fn param_list(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            params.push(self.binding_name()?);
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment_level)
    }

    fn assignment_level(&mut self) -> Result<Expr, ScriptError> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }
        let target = self.conditional()?;
        let op = match self.peek() {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinaryOp::Add),
            Tok::Punct("-=") => Some(BinaryOp::Sub),
            Tok::Punct("*=") => Some(BinaryOp::Mul),
            Tok::Punct("/=") => Some(BinaryOp::Div),
            Tok::Punct("%=") => Some(BinaryOp::Rem),
            _ => return Ok(target),
        };
        let Expr::Ident(name) = target else {
            return Err(self.unexpected("invalid assignment target"));
        };
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            name,
            op,
            value: Box::new(value),
        })
    }

    fn try_arrow(&mut self) -> Result<Option<Expr>, ScriptError> {
        let params = match self.peek() {
            Tok::Ident(name)
                if !RESERVED.contains(&name.as_str())
                    && matches!(self.peek_at(1), Tok::Punct("=>")) =>
            {
                let name = name.clone();
                self.pos += 2;
                vec![name]
            }
            Tok::Punct("(") if self.arrow_params_ahead() => {
                self.advance();
                let params = self.param_list()?;
                self.expect_punct("=>")?;
                params
            }
            _ => return Ok(None),
        };
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.assignment()?)
        };
        Ok(Some(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
        }))))
    }

    /// Looks for `( [ident {, ident}] ) =>` without consuming anything.
    fn arrow_params_ahead(&self) -> bool {
        let mut i = 1;
        if matches!(self.peek_at(i), Tok::Punct(")")) {
            return matches!(self.peek_at(i + 1), Tok::Punct("=>"));
        }
        loop {
            match self.peek_at(i) {
                Tok::Ident(_) => i += 1,
                _ => return false,
            }
            match self.peek_at(i) {
                Tok::Punct(",") => i += 1,
                Tok::Punct(")") => return matches!(self.peek_at(i + 1), Tok::Punct("=>")),
                _ => return false,
            }
        }
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let test = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level(
            &[("||", LogicalOp::Or), ("??", LogicalOp::Nullish)],
            Self::logical_and,
        )
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level(&[("&&", LogicalOp::And)], Self::equality)
    }

    fn logical_level(
        &mut self,
        ops: &[(&str, LogicalOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        let mut chain = 0;
        'outer: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    self.descend()?;
                    chain += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Logical {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            self.depth -= chain;
            return Ok(lhs);
        }
    }

    // Each link of a left-leaning chain counts as a nesting level.
    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        let mut chain = 0;
        'outer: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    self.descend()?;
                    chain += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            self.depth -= chain;
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNe),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::unary_level)
    }

    fn unary_level(&mut self) -> Result<Expr, ScriptError> {
        let delta = if self.eat_punct("++") {
            Some(1.0)
        } else if self.eat_punct("--") {
            Some(-1.0)
        } else {
            None
        };
        if let Some(delta) = delta {
            let Expr::Ident(name) = self.unary()? else {
                return Err(self.unexpected("invalid update target"));
            };
            return Ok(Expr::Update {
                name,
                delta,
                prefix: true,
            });
        }
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else if self.eat_word("typeof") {
            UnaryOp::TypeOf
        } else {
            return self.postfix();
        };
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        let mut chain = 0;
        loop {
            let optional = self.eat_punct("?.");
            let link = if self.eat_punct("[") {
                Link::Index
            } else if self.eat_punct("(") {
                Link::Call
            } else if optional || self.eat_punct(".") {
                Link::Member
            } else {
                break;
            };
            self.descend()?;
            chain += 1;
            expr = match link {
                Link::Member => {
                    let property = match self.advance() {
                        Tok::Ident(name) => name,
                        _ => return Err(self.unexpected("expected a property name")),
                    };
                    Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional,
                    }
                }
                Link::Index => {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional,
                    }
                }
                Link::Call => Expr::Call {
                    callee: Box::new(expr),
                    args: self.arguments()?,
                    optional,
                },
            };
        }
        self.depth -= chain;

        let delta = match self.peek() {
            Tok::Punct("++") => 1.0,
            Tok::Punct("--") => -1.0,
            _ => return Ok(expr),
        };
        let Expr::Ident(name) = expr else {
            return Err(self.unexpected("invalid update target"));
        };
        self.advance();
        Ok(Expr::Update {
            name,
            delta,
            prefix: false,
        })
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let start = self.pos;
        let offset = self.offset();
        match self.advance() {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s.into())),
            Tok::Regex { pattern, flags } => RegexValue::new(&pattern, &flags)
                .map(|re| Expr::Regex(Rc::new(re)))
                .map_err(|message| ScriptError::syntax(offset, message)),
            Tok::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "function" => Ok(Expr::Function(self.function_rest(false)?)),
                w if RESERVED.contains(&w) => {
                    self.pos = start;
                    Err(self.unexpected("unexpected keyword"))
                }
                _ => Ok(Expr::Ident(word)),
            },
            Tok::Template { quasis, exprs } => {
                let exprs = exprs
                    .iter()
                    .map(|(at, src)| self.substitution(*at, src))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Template {
                    quasis: quasis.into_iter().map(Rc::from).collect(),
                    exprs,
                })
            }
            Tok::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => self.object_literal(),
            _ => {
                self.pos = start;
                Err(self.unexpected("expected an expression"))
            }
        }
    }

    /// Parses the source of one `${...}` at the current nesting depth.
    fn substitution(&mut self, at: usize, src: &str) -> Result<Expr, ScriptError> {
        let shift = |err| match err {
            ScriptError::Syntax { pos, message } => ScriptError::Syntax {
                pos: pos + at,
                message,
            },
            other => other,
        };
        let mut tokens = tokenize(src).map_err(shift)?;
        for token in &mut tokens {
            token.pos += at;
        }
        let mut inner = Parser {
            tokens,
            pos: 0,
            depth: self.depth,
        };
        let expr = inner.expression()?;
        inner.expect_eof()?;
        Ok(expr)
    }

    fn object_literal(&mut self) -> Result<Expr, ScriptError> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            let key = match self.advance() {
                Tok::Ident(name) => name,
                Tok::Str(s) => s,
                Tok::Number(n) => super::value::format_number(n),
                _ => return Err(self.unexpected("expected a property key")),
            };
            let value = if self.eat_punct(":") {
                self.assignment()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        Ok(Expr::Object(entries))
    }
}

enum Link {
    Member,
    Index,
    Call,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let expr = parse_expression("1 + 2 * 3 == 7").unwrap();
        let Expr::Binary {
            op: BinaryOp::LooseEq,
            lhs,
            ..
        } = expr
        else {
            panic!("expected equality at the root");
        };
        assert!(matches!(
            *lhs,
            Expr::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn single_param_arrow() {
        let expr = parse_expression("dim => parseInt(dim, 10)").unwrap();
        let Expr::Function(def) = expr else {
            panic!("expected a function");
        };
        assert_eq!(def.params, vec!["dim".to_string()]);
        assert!(matches!(def.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn parenthesised_arrow_with_block_body() {
        let expr = parse_expression("(a, b) => { return a + b; }").unwrap();
        let Expr::Function(def) = expr else {
            panic!("expected a function");
        };
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.body, FunctionBody::Block(_)));
    }

    #[test]
    fn parenthesised_expression_is_not_an_arrow() {
        assert!(matches!(
            parse_expression("(a) + 1").unwrap(),
            Expr::Binary { .. }
        ));
    }

    #[test]
    fn program_exposes_first_function_name() {
        let program = parse_program("function tensorShape(x) { return null; }").unwrap();
        assert_eq!(program.first_function_name(), Some("tensorShape"));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(matches!(
            parse_expression("a b"),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn deeply_nested_arrays_are_rejected() {
        let src = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));
        let err = parse_expression(&src).unwrap_err();
        assert!(
            matches!(&err, ScriptError::Syntax { message, .. } if message.contains("nesting")),
            "{err:?}"
        );
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let src = format!("value == 1{}", "+1".repeat(50_000));
        assert!(matches!(
            parse_expression(&src),
            Err(ScriptError::Syntax { .. })
        ));
        let src = format!("x{}", ".y".repeat(50_000));
        assert!(matches!(
            parse_expression(&src),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn nesting_within_the_limit_parses() {
        let src = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert!(parse_expression(&src).is_ok());
        let src = format!("1{}", " + 1".repeat(100));
        assert!(parse_expression(&src).is_ok());
    }

    #[test]
    fn nested_blocks_are_bounded() {
        let src = format!("{}{}", "{".repeat(5_000), "}".repeat(5_000));
        assert!(matches!(
            parse_program(&src),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn template_substitutions_share_the_nesting_limit() {
        let src = format!("{}x{}", "`${".repeat(200), "}`".repeat(200));
        assert!(matches!(
            parse_expression(&src),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn syntax_errors_inside_templates_point_into_the_source() {
        let err = parse_expression("`a ${1 +} b`").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { pos: 8, .. }), "{err:?}");
    }

    #[test]
    fn loops_parse() {
        let program = parse_program(
            "for (let i = 0; i < 3; i++) { continue; } for (const d of dims) break; while (n) n -= 1;",
        )
        .unwrap();
        assert!(matches!(program.body[0], Stmt::For { .. }));
        assert!(matches!(program.body[1], Stmt::ForOf { .. }));
        assert!(matches!(program.body[2], Stmt::While { .. }));
    }

    #[test]
    fn optional_links_are_marked() {
        let expr = parse_expression("a?.b.c").unwrap();
        let Expr::Member {
            object, optional, ..
        } = expr
        else {
            panic!("expected a member access");
        };
        assert!(!optional);
        assert!(matches!(*object, Expr::Member { optional: true, .. }));
    }

    #[test]
    fn update_needs_an_identifier() {
        assert!(parse_expression("1++").is_err());
        assert!(matches!(
            parse_expression("++n").unwrap(),
            Expr::Update { prefix: true, .. }
        ));
    }

    #[test]
    fn invalid_regex_literal_is_a_syntax_error() {
        assert!(matches!(
            parse_expression("/(unclosed/"),
            Err(ScriptError::Syntax { .. })
        ));
    }
}
