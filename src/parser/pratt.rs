// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pratt parser for template expressions
//!
//! Binary operators are driven by [`BinaryOperator::precedence`]; everything
//! that binds tighter than `**` (unary sign, attribute/item access, calls,
//! filters and tests) is handled by the unary and postfix parsers.
//!
//! Precedence levels (lowest to highest):
//! - `or`
//! - `and`
//! - `not` (prefix)
//! - comparisons, `in`, `not in`
//! - `~`
//! - `+`, `-`
//! - `*`, `/`, `//`, `%`
//! - `**` (right associative)
//! - unary `-`/`+`, postfix `.`/`[]`/`()`, `|filter`, `is test`

use super::lexer::TokenStream;
use super::tokenizer::TokenKind;
use crate::ast::{BinaryOperator, Expr, Literal, UnaryOperator};
use crate::error::Result;

/// Binary operator at the head of the stream and how many tokens it spans
fn peek_binary_op(stream: &TokenStream) -> Option<(BinaryOperator, usize)> {
    let op = match &stream.peek().kind {
        TokenKind::Operator(op) => match *op {
            "+" => BinaryOperator::Add,
            "-" => BinaryOperator::Subtract,
            "*" => BinaryOperator::Multiply,
            "/" => BinaryOperator::Divide,
            "//" => BinaryOperator::FloorDivide,
            "%" => BinaryOperator::Modulo,
            "**" => BinaryOperator::Power,
            "~" => BinaryOperator::Concat,
            "==" => BinaryOperator::Equal,
            "!=" => BinaryOperator::NotEqual,
            "<" => BinaryOperator::LessThan,
            "<=" => BinaryOperator::LessThanOrEqual,
            ">" => BinaryOperator::GreaterThan,
            ">=" => BinaryOperator::GreaterThanOrEqual,
            _ => return None,
        },
        TokenKind::Name(name) => match name.as_str() {
            "and" => BinaryOperator::And,
            "or" => BinaryOperator::Or,
            "in" => BinaryOperator::In,
            "not" if stream.peek_ahead(1).kind.is_name("in") => {
                return Some((BinaryOperator::NotIn, 2));
            }
            _ => return None,
        },
        _ => return None,
    };
    Some((op, 1))
}

/// Expression parser over a shared token stream
pub struct PrattParser<'s> {
    stream: &'s mut TokenStream,
}

impl<'s> PrattParser<'s> {
    /// Create a parser positioned at the stream's current token
    pub fn new(stream: &'s mut TokenStream) -> Self {
        Self { stream }
    }

    /// Parse a full expression, including `a if b else c`
    pub fn parse_expression(&mut self) -> Result<Expr> {
        let expr = self.parse_binary(0)?;
        self.parse_conditional_tail(expr)
    }

    /// Parse an expression without the trailing conditional form
    pub fn parse_expression_no_conditional(&mut self) -> Result<Expr> {
        self.parse_binary(0)
    }

    fn parse_conditional_tail(&mut self, mut expr: Expr) -> Result<Expr> {
        while self.stream.skip_name("if") {
            let condition = self.parse_binary(0)?;
            let otherwise = if self.stream.skip_name("else") {
                Some(Box::new(self.parse_expression()?))
            } else {
                None
            };
            expr = Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(expr),
                otherwise,
            };
        }
        Ok(expr)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut left = self.parse_prefix()?;

        while let Some((op, width)) = peek_binary_op(self.stream) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            for _ in 0..width {
                self.stream.next_token();
            }
            let next_min = if op.is_left_associative() {
                precedence + 1
            } else {
                precedence
            };
            let right = self.parse_binary(next_min)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        // `not in` is a binary operator, plain `not` is prefix
        if self.stream.peek().kind.is_name("not") && !self.stream.peek_ahead(1).kind.is_name("in")
        {
            self.stream.next_token();
            let operand = self.parse_binary(UnaryOperator::Not.precedence())?;
            return Ok(Expr::Unary {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_unary(true)
    }

    fn parse_unary(&mut self, with_filter: bool) -> Result<Expr> {
        let op = match &self.stream.peek().kind {
            TokenKind::Operator("-") => Some(UnaryOperator::Negate),
            TokenKind::Operator("+") => Some(UnaryOperator::Positive),
            _ => None,
        };

        let node = match op {
            Some(op) => {
                self.stream.next_token();
                let operand = self.parse_unary(false)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            None => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)?
            }
        };

        if with_filter {
            self.parse_filters_and_tests(node)
        } else {
            Ok(node)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.stream.next_token();
        match token.kind {
            TokenKind::Name(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Const(Literal::Bool(true)),
                "false" | "False" => Expr::Const(Literal::Bool(false)),
                "none" | "None" => Expr::Const(Literal::None),
                _ => Expr::Name(name),
            }),
            TokenKind::String(mut value) => {
                // Adjacent string literals are concatenated
                while let TokenKind::String(next) = &self.stream.peek().kind {
                    value.push_str(next);
                    self.stream.next_token();
                }
                Ok(Expr::Const(Literal::String(value)))
            }
            TokenKind::Integer(i) => Ok(Expr::Const(Literal::Integer(i))),
            TokenKind::Float(f) => Ok(Expr::Const(Literal::Float(f))),
            TokenKind::Operator("(") => {
                if self.stream.skip_operator(")") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expression()?;
                if self.stream.skip_operator(")") {
                    return Ok(first);
                }
                // Tuples are represented as lists
                let mut items = vec![first];
                while self.stream.skip_operator(",") {
                    if self.stream.peek().kind.is_operator(")") {
                        break;
                    }
                    items.push(self.parse_expression()?);
                }
                self.stream.expect_operator(")")?;
                Ok(Expr::List(items))
            }
            TokenKind::Operator("[") => {
                let mut items = Vec::new();
                while !self.stream.skip_operator("]") {
                    if !items.is_empty() {
                        self.stream.expect_operator(",")?;
                        if self.stream.skip_operator("]") {
                            break;
                        }
                    }
                    items.push(self.parse_expression()?);
                }
                Ok(Expr::List(items))
            }
            TokenKind::Operator("{") => {
                let mut pairs = Vec::new();
                while !self.stream.skip_operator("}") {
                    if !pairs.is_empty() {
                        self.stream.expect_operator(",")?;
                        if self.stream.skip_operator("}") {
                            break;
                        }
                    }
                    let key = self.parse_expression()?;
                    self.stream.expect_operator(":")?;
                    let value = self.parse_expression()?;
                    pairs.push((key, value));
                }
                Ok(Expr::Dict(pairs))
            }
            kind => Err(crate::error::TemplateError::syntax(
                format!("unexpected {kind}"),
                token.line,
            )),
        }
    }

    fn parse_postfix(&mut self, mut node: Expr) -> Result<Expr> {
        loop {
            if self.stream.skip_operator(".") {
                let token = self.stream.next_token();
                node = match token.kind {
                    TokenKind::Name(name) => Expr::GetAttr {
                        obj: Box::new(node),
                        name,
                    },
                    TokenKind::Integer(i) => Expr::GetItem {
                        obj: Box::new(node),
                        key: Box::new(Expr::Const(Literal::Integer(i))),
                    },
                    kind => {
                        return Err(crate::error::TemplateError::syntax(
                            format!("expected attribute name, got {kind}"),
                            token.line,
                        ));
                    }
                };
            } else if self.stream.skip_operator("[") {
                let key = self.parse_expression()?;
                self.stream.expect_operator("]")?;
                node = Expr::GetItem {
                    obj: Box::new(node),
                    key: Box::new(key),
                };
            } else if self.stream.skip_operator("(") {
                let (args, kwargs) = self.parse_call_args()?;
                node = Expr::Call {
                    func: Box::new(node),
                    args,
                    kwargs,
                };
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_filters_and_tests(&mut self, mut node: Expr) -> Result<Expr> {
        loop {
            if self.stream.skip_operator("|") {
                let name = self.stream.expect_name()?;
                let (args, kwargs) = if self.stream.skip_operator("(") {
                    self.parse_call_args()?
                } else {
                    (Vec::new(), Vec::new())
                };
                node = Expr::Filter {
                    expr: Box::new(node),
                    name,
                    args,
                    kwargs,
                };
            } else if self.stream.skip_name("is") {
                let negated = self.stream.skip_name("not");
                let name = self.stream.expect_name()?;
                let args = if self.stream.skip_operator("(") {
                    let (args, kwargs) = self.parse_call_args()?;
                    if !kwargs.is_empty() {
                        return Err(self.stream.unexpected("positional test arguments"));
                    }
                    args
                } else if self.starts_bare_test_argument() {
                    let arg = self.parse_primary()?;
                    vec![self.parse_postfix(arg)?]
                } else {
                    Vec::new()
                };
                node = Expr::Test {
                    expr: Box::new(node),
                    name,
                    args,
                    negated,
                };
            } else {
                return Ok(node);
            }
        }
    }

    /// `x is divisibleby 3` style single argument
    fn starts_bare_test_argument(&self) -> bool {
        match &self.stream.peek().kind {
            TokenKind::Integer(_) | TokenKind::Float(_) | TokenKind::String(_) => true,
            TokenKind::Operator(op) => *op == "[" || *op == "{",
            TokenKind::Name(name) => !matches!(
                name.as_str(),
                "else" | "or" | "and" | "if" | "in" | "is" | "not"
            ),
            _ => false,
        }
    }

    #[allow(clippy::type_complexity)]
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.stream.skip_operator(")") {
            if !args.is_empty() || !kwargs.is_empty() {
                self.stream.expect_operator(",")?;
                if self.stream.skip_operator(")") {
                    break;
                }
            }

            let is_keyword = matches!(self.stream.peek().kind, TokenKind::Name(_))
                && self.stream.peek_ahead(1).kind.is_operator("=");
            if is_keyword {
                let name = self.stream.expect_name()?;
                self.stream.next_token();
                kwargs.push((name, self.parse_expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self
                        .stream
                        .unexpected("keyword argument after keyword arguments"));
                }
                args.push(self.parse_expression()?);
            }
        }

        Ok((args, kwargs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Syntax;
    use crate::parser::tokenizer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse(expr: &str) -> Expr {
        let tokens = tokenize(&format!("{{{{ {expr} }}}}"), &Syntax::default(), false).unwrap();
        let mut stream = TokenStream::new(tokens);
        stream.next_token();
        let parsed = PrattParser::new(&mut stream).parse_expression().unwrap();
        assert!(stream.expect_variable_end().is_ok(), "trailing tokens in {expr}");
        parsed
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Const(Literal::Integer(i)))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::Binary {
                op: BinaryOperator::Add,
                left: int(1),
                right: Box::new(Expr::Binary {
                    op: BinaryOperator::Multiply,
                    left: int(2),
                    right: int(3),
                }),
            }
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(
            parse("2 ** 3 ** 2"),
            Expr::Binary {
                op: BinaryOperator::Power,
                left: int(2),
                right: Box::new(Expr::Binary {
                    op: BinaryOperator::Power,
                    left: int(3),
                    right: int(2),
                }),
            }
        );
    }

    #[test]
    fn test_not_binds_looser_than_comparison() {
        let expr = parse("not a == b");
        assert!(matches!(
            expr,
            Expr::Unary { op: UnaryOperator::Not, ref operand }
                if matches!(**operand, Expr::Binary { op: BinaryOperator::Equal, .. })
        ));
    }

    #[test]
    fn test_not_in() {
        assert!(matches!(
            parse("a not in b"),
            Expr::Binary {
                op: BinaryOperator::NotIn,
                ..
            }
        ));
    }

    #[test]
    fn test_filters_with_arguments() {
        assert_eq!(
            parse("name|default('x')|upper"),
            Expr::Filter {
                expr: Box::new(Expr::Filter {
                    expr: Box::new(Expr::Name("name".into())),
                    name: "default".into(),
                    args: vec![Expr::string("x")],
                    kwargs: vec![],
                }),
                name: "upper".into(),
                args: vec![],
                kwargs: vec![],
            }
        );
    }

    #[test]
    fn test_tests() {
        assert_eq!(
            parse("n is not divisibleby 3"),
            Expr::Test {
                expr: Box::new(Expr::Name("n".into())),
                name: "divisibleby".into(),
                args: vec![Expr::Const(Literal::Integer(3))],
                negated: true,
            }
        );
        assert!(matches!(
            parse("x is defined and y"),
            Expr::Binary {
                op: BinaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_postfix_chain() {
        assert_eq!(
            parse("user.items[0](1, key=2)"),
            Expr::Call {
                func: Box::new(Expr::GetItem {
                    obj: Box::new(Expr::GetAttr {
                        obj: Box::new(Expr::Name("user".into())),
                        name: "items".into(),
                    }),
                    key: int(0),
                }),
                args: vec![Expr::Const(Literal::Integer(1))],
                kwargs: vec![("key".into(), Expr::Const(Literal::Integer(2)))],
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse("[1, 'a', none, true,]"),
            Expr::List(vec![
                Expr::Const(Literal::Integer(1)),
                Expr::string("a"),
                Expr::Const(Literal::None),
                Expr::Const(Literal::Bool(true)),
            ])
        );
        assert_eq!(
            parse("{'a': 1}"),
            Expr::Dict(vec![(Expr::string("a"), Expr::Const(Literal::Integer(1)))])
        );
        assert_eq!(parse("'a' 'b'"), Expr::string("ab"));
    }

    #[test]
    fn test_conditional() {
        assert_eq!(
            parse("a if b"),
            Expr::Conditional {
                condition: Box::new(Expr::Name("b".into())),
                then: Box::new(Expr::Name("a".into())),
                otherwise: None,
            }
        );
    }

    #[test]
    fn test_negation_applies_before_filter() {
        assert_eq!(
            parse("-1|abs"),
            Expr::Filter {
                expr: Box::new(Expr::Unary {
                    op: UnaryOperator::Negate,
                    operand: int(1),
                }),
                name: "abs".into(),
                args: vec![],
                kwargs: vec![],
            }
        );
    }
}
