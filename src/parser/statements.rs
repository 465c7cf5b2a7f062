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

//! Statement parser producing the template AST

use super::lexer::TokenStream;
use super::pratt::PrattParser;
use super::tokenizer::TokenKind;
use crate::ast::{Expr, MacroParam, Node, Template};
use crate::error::{Result, TemplateError};

/// Tags that close an enclosing statement
const END_TAGS: &[&str] = &[
    "elif", "else", "endif", "endfor", "endmacro", "endblock",
];

/// Recursive-descent parser for template statements
pub struct Parser {
    stream: TokenStream,
}

impl Parser {
    /// Create a parser over a token stream
    pub fn new(stream: TokenStream) -> Self {
        Self { stream }
    }

    /// Parse the whole template
    pub fn parse_template(mut self) -> Result<Template> {
        let (body, _) = self.subparse(&[])?;
        Ok(Template { body })
    }

    fn expression(&mut self) -> Result<Expr> {
        PrattParser::new(&mut self.stream).parse_expression()
    }

    /// Parse nodes until one of `end_tags` opens a statement.
    ///
    /// The end tag's name is consumed; the rest of that tag is left to the caller.
    fn subparse(&mut self, end_tags: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        let mut body = Vec::new();

        loop {
            let token = self.stream.next_token();
            match token.kind {
                TokenKind::Data(text) => body.push(Node::Text {
                    text,
                    line: token.line,
                }),
                TokenKind::VariableBegin => {
                    let expr = self.expression()?;
                    self.stream.expect_variable_end()?;
                    body.push(Node::Output {
                        expr,
                        line: token.line,
                    });
                }
                TokenKind::BlockBegin | TokenKind::LineStatementBegin => {
                    let line = self.stream.line();
                    let name = self.stream.expect_name()?;
                    if end_tags.contains(&name.as_str()) {
                        return Ok((body, Some(name)));
                    }
                    if END_TAGS.contains(&name.as_str()) {
                        return Err(TemplateError::syntax(
                            format!("encountered unexpected tag '{name}'"),
                            line,
                        ));
                    }
                    body.push(self.parse_statement(&name, line)?);
                }
                TokenKind::Eof => {
                    if end_tags.is_empty() {
                        return Ok((body, None));
                    }
                    let expected = end_tags
                        .iter()
                        .map(|t| format!("'{t}'"))
                        .collect::<Vec<_>>()
                        .join(" or ");
                    return Err(TemplateError::syntax(
                        format!("unexpected end of template, expected {expected}"),
                        token.line,
                    ));
                }
                kind => {
                    return Err(TemplateError::syntax(
                        format!("unexpected {kind}"),
                        token.line,
                    ));
                }
            }
        }
    }

    fn parse_statement(&mut self, name: &str, line: usize) -> Result<Node> {
        match name {
            "if" => self.parse_if(line),
            "for" => self.parse_for(line),
            "set" => self.parse_set(line),
            "macro" => self.parse_macro(line),
            "block" => self.parse_block(line),
            "extends" => {
                let template = self.expression()?;
                self.stream.expect_block_end()?;
                Ok(Node::Extends { template, line })
            }
            "include" => self.parse_include(line),
            "import" => self.parse_import(line),
            "from" => self.parse_from(line),
            other => Err(TemplateError::syntax(
                format!("encountered unknown tag '{other}'"),
                line,
            )),
        }
    }

    fn parse_if(&mut self, line: usize) -> Result<Node> {
        let mut branches = Vec::new();
        let mut else_body = Vec::new();
        let mut condition = self.expression()?;

        loop {
            self.stream.expect_block_end()?;
            let (body, end) = self.subparse(&["elif", "else", "endif"])?;
            branches.push((condition, body));
            match end.as_deref() {
                Some("elif") => condition = self.expression()?,
                Some("else") => {
                    self.stream.expect_block_end()?;
                    let (body, _) = self.subparse(&["endif"])?;
                    else_body = body;
                    break;
                }
                _ => break,
            }
        }

        self.stream.expect_block_end()?;
        Ok(Node::If {
            branches,
            else_body,
            line,
        })
    }

    fn parse_for(&mut self, line: usize) -> Result<Node> {
        let parenthesized = self.stream.skip_operator("(");
        let mut targets = vec![self.stream.expect_name()?];
        while self.stream.skip_operator(",") {
            targets.push(self.stream.expect_name()?);
        }
        if parenthesized {
            self.stream.expect_operator(")")?;
        }
        self.stream.expect_keyword("in")?;
        let iter = PrattParser::new(&mut self.stream).parse_expression_no_conditional()?;
        self.stream.expect_block_end()?;

        let (body, end) = self.subparse(&["else", "endfor"])?;
        let else_body = if end.as_deref() == Some("else") {
            self.stream.expect_block_end()?;
            self.subparse(&["endfor"])?.0
        } else {
            Vec::new()
        };
        self.stream.expect_block_end()?;

        Ok(Node::For {
            targets,
            iter,
            body,
            else_body,
            line,
        })
    }

    fn parse_set(&mut self, line: usize) -> Result<Node> {
        let name = self.stream.expect_name()?;
        self.stream.expect_operator("=")?;
        let value = self.expression()?;
        self.stream.expect_block_end()?;
        Ok(Node::Set { name, value, line })
    }

    fn parse_macro(&mut self, line: usize) -> Result<Node> {
        let name = self.stream.expect_name()?;
        self.stream.expect_operator("(")?;

        let mut params: Vec<MacroParam> = Vec::new();
        while !self.stream.skip_operator(")") {
            if !params.is_empty() {
                self.stream.expect_operator(",")?;
                if self.stream.skip_operator(")") {
                    break;
                }
            }
            let param = self.stream.expect_name()?;
            let default = if self.stream.skip_operator("=") {
                Some(self.expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(TemplateError::syntax(
                        "non-default argument follows default argument",
                        self.stream.line(),
                    ));
                }
                None
            };
            params.push(MacroParam {
                name: param,
                default,
            });
        }
        self.stream.expect_block_end()?;

        let (body, _) = self.subparse(&["endmacro"])?;
        self.stream.expect_block_end()?;
        Ok(Node::Macro {
            name,
            params,
            body,
            line,
        })
    }

    fn parse_block(&mut self, line: usize) -> Result<Node> {
        let name = self.stream.expect_name()?;
        self.stream.expect_block_end()?;
        let (body, _) = self.subparse(&["endblock"])?;

        if let TokenKind::Name(closing) = &self.stream.peek().kind {
            if *closing != name {
                return Err(TemplateError::syntax(
                    format!("'{name}' block closed by 'endblock {closing}'"),
                    self.stream.line(),
                ));
            }
            self.stream.next_token();
        }
        self.stream.expect_block_end()?;
        Ok(Node::Block { name, body, line })
    }

    /// Accept and ignore `with context` / `without context`
    fn skip_context_modifier(&mut self) -> Result<()> {
        if self.stream.skip_name("with") || self.stream.skip_name("without") {
            self.stream.expect_keyword("context")?;
        }
        Ok(())
    }

    fn parse_include(&mut self, line: usize) -> Result<Node> {
        let template = self.expression()?;
        let ignore_missing = if self.stream.skip_name("ignore") {
            self.stream.expect_keyword("missing")?;
            true
        } else {
            false
        };
        self.skip_context_modifier()?;
        self.stream.expect_block_end()?;
        Ok(Node::Include {
            template,
            ignore_missing,
            line,
        })
    }

    fn parse_import(&mut self, line: usize) -> Result<Node> {
        let template = PrattParser::new(&mut self.stream).parse_expression_no_conditional()?;
        self.stream.expect_keyword("as")?;
        let alias = self.stream.expect_name()?;
        self.skip_context_modifier()?;
        self.stream.expect_block_end()?;
        Ok(Node::Import {
            template,
            alias,
            line,
        })
    }

    fn parse_from(&mut self, line: usize) -> Result<Node> {
        let template = PrattParser::new(&mut self.stream).parse_expression_no_conditional()?;
        self.stream.expect_keyword("import")?;

        let mut names = Vec::new();
        loop {
            if self.stream.peek().kind.is_name("with") || self.stream.peek().kind.is_name("without")
            {
                break;
            }
            let name = self.stream.expect_name()?;
            if name.starts_with('_') {
                return Err(TemplateError::syntax(
                    "names starting with an underscore can not be imported",
                    line,
                ));
            }
            let alias = if self.stream.skip_name("as") {
                Some(self.stream.expect_name()?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.stream.skip_operator(",") {
                break;
            }
        }
        self.skip_context_modifier()?;
        self.stream.expect_block_end()?;

        Ok(Node::FromImport {
            template,
            names,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::environment::Syntax;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn parse_default(source: &str) -> Template {
        parse(source, &Syntax::default(), false).unwrap()
    }

    #[test]
    fn test_text_and_output() {
        let template = parse_default("Hello {{ name }}!");
        assert_eq!(
            template.body,
            vec![
                Node::Text {
                    text: "Hello ".into(),
                    line: 1
                },
                Node::Output {
                    expr: Expr::Name("name".into()),
                    line: 1
                },
                Node::Text {
                    text: "!".into(),
                    line: 1
                },
            ]
        );
    }

    #[test]
    fn test_if_elif_else() {
        let template = parse_default("{% if a %}1{% elif b %}2{% else %}3{% endif %}");
        match &template.body[0] {
            Node::If {
                branches,
                else_body,
                ..
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_for_with_unpacking_and_else() {
        let template = parse_default("{% for k, v in items %}{{ k }}{% else %}none{% endfor %}");
        match &template.body[0] {
            Node::For {
                targets, else_body, ..
            } => {
                assert_eq!(targets, &vec!["k".to_string(), "v".to_string()]);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_macro_params() {
        let template = parse_default("{% macro m(a, b=2) %}{{ a }}{% endmacro %}");
        match &template.body[0] {
            Node::Macro { name, params, .. } => {
                assert_eq!(name, "m");
                assert_eq!(params[0].default, None);
                assert_eq!(params[1].default, Some(Expr::Const(Literal::Integer(2))));
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert!(parse("{% macro m(a=1, b) %}{% endmacro %}", &Syntax::default(), false).is_err());
    }

    #[test]
    fn test_block_names_must_match() {
        assert!(parse("{% block a %}{% endblock a %}", &Syntax::default(), false).is_ok());
        assert!(parse("{% block a %}{% endblock b %}", &Syntax::default(), false).is_err());
    }

    #[test]
    fn test_extends_and_imports() {
        let template = parse_default(
            "{% extends 'base' %}{% import 'm' as m %}{% from 'h' import a, b as c %}",
        );
        assert_eq!(template.extends(), Some(&Expr::string("base")));
        assert_eq!(
            template.body[2],
            Node::FromImport {
                template: Expr::string("h"),
                names: vec![("a".into(), None), ("b".into(), Some("c".into()))],
                line: 1,
            }
        );
    }

    #[test]
    fn test_include_ignore_missing() {
        let template = parse_default("{% include 'x' ignore missing with context %}");
        assert!(matches!(
            template.body[0],
            Node::Include {
                ignore_missing: true,
                ..
            }
        ));
    }

    #[test]
    fn test_errors_report_lines() {
        let err = parse("a\n\n{% endif %}", &Syntax::default(), false).unwrap_err();
        assert_eq!(err.line(), Some(3));

        let err = parse("{% for x in y %}\n", &Syntax::default(), false).unwrap_err();
        assert!(err.to_string().contains("endfor"));

        let err = parse("{% frobnicate %}", &Syntax::default(), false).unwrap_err();
        assert!(err.to_string().contains("unknown tag"));
    }
}
