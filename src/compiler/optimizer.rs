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

//! AST optimization passes
//!
//! Constant folding over expressions, dead-branch elimination for `if`
//! statements with constant conditions, and merging of constant output into
//! adjacent template data. The passes never change observable output: a
//! folding step that would fail at runtime is left in place so the error is
//! raised with its source location when the template renders.

use crate::ast::{BinaryOperator, Expr, Literal, MacroParam, Node, Template};
use crate::runtime::operators;

/// Configuration for optimization passes
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Fold operators applied to constants
    pub constant_folding: bool,
    /// Drop `if` branches whose condition is a known constant
    pub dead_code_elimination: bool,
    /// Turn constant `{{ ... }}` output into template data
    pub inline_constant_output: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            constant_folding: true,
            dead_code_elimination: true,
            inline_constant_output: true,
        }
    }
}

/// Template optimizer that applies the enabled passes
#[derive(Debug, Default)]
pub struct TemplateOptimizer {
    config: OptimizationConfig,
}

impl TemplateOptimizer {
    /// Create a new optimizer with custom configuration
    pub fn with_config(config: OptimizationConfig) -> Self {
        Self { config }
    }

    /// Optimize a parsed template
    pub fn optimize(&self, template: Template) -> Template {
        Template {
            body: self.optimize_body(template.body),
        }
    }

    fn optimize_body(&self, nodes: Vec<Node>) -> Vec<Node> {
        let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
        for node in nodes {
            for node in self.optimize_node(node) {
                match (out.last_mut(), node) {
                    (Some(Node::Text { text, .. }), Node::Text { text: more, .. }) => {
                        text.push_str(&more);
                    }
                    (_, node) => out.push(node),
                }
            }
        }
        out
    }

    fn optimize_node(&self, node: Node) -> Vec<Node> {
        match node {
            Node::Output { expr, line } => {
                let expr = self.fold(expr);
                if self.config.inline_constant_output {
                    if let Some(text) = expr.as_const().and_then(constant_text) {
                        return vec![Node::Text { text, line }];
                    }
                }
                vec![Node::Output { expr, line }]
            }
            Node::If {
                branches,
                else_body,
                line,
            } => self.optimize_if(branches, else_body, line),
            Node::For {
                targets,
                iter,
                body,
                else_body,
                line,
            } => vec![Node::For {
                targets,
                iter: self.fold(iter),
                body: self.optimize_body(body),
                else_body: self.optimize_body(else_body),
                line,
            }],
            Node::Set { name, value, line } => vec![Node::Set {
                name,
                value: self.fold(value),
                line,
            }],
            Node::Macro {
                name,
                params,
                body,
                line,
            } => vec![Node::Macro {
                name,
                params: params
                    .into_iter()
                    .map(|p| MacroParam {
                        name: p.name,
                        default: p.default.map(|d| self.fold(d)),
                    })
                    .collect(),
                body: self.optimize_body(body),
                line,
            }],
            Node::Block { name, body, line } => vec![Node::Block {
                name,
                body: self.optimize_body(body),
                line,
            }],
            other => vec![other],
        }
    }

    fn optimize_if(
        &self,
        branches: Vec<(Expr, Vec<Node>)>,
        else_body: Vec<Node>,
        line: usize,
    ) -> Vec<Node> {
        let mut kept = Vec::with_capacity(branches.len());
        for (condition, body) in branches {
            let condition = self.fold(condition);
            let known = if self.config.dead_code_elimination {
                condition.as_const().map(|lit| lit.to_value().is_true())
            } else {
                None
            };
            match known {
                Some(false) => continue,
                // A constant-true branch ends the chain; with nothing before it, it replaces the if
                Some(true) if kept.is_empty() => return self.optimize_body(body),
                Some(true) => {
                    let body = self.optimize_body(body);
                    return vec![Node::If {
                        branches: kept,
                        else_body: body,
                        line,
                    }];
                }
                None => kept.push((condition, self.optimize_body(body))),
            }
        }

        let else_body = self.optimize_body(else_body);
        if kept.is_empty() {
            return else_body;
        }
        vec![Node::If {
            branches: kept,
            else_body,
            line,
        }]
    }

    /// Fold constant subexpressions
    pub fn fold(&self, expr: Expr) -> Expr {
        if !self.config.constant_folding {
            return expr;
        }
        match expr {
            Expr::Unary { op, operand } => {
                let operand = self.fold(*operand);
                if let Some(folded) = operand
                    .as_const()
                    .and_then(|lit| operators::unary(op, &lit.to_value()).ok())
                    .and_then(|v| Literal::from_value(&v))
                {
                    return Expr::Const(folded);
                }
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            Expr::Binary { op, left, right } => self.fold_binary(op, *left, *right),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.fold(*condition);
                let then = self.fold(*then);
                let otherwise = otherwise.map(|o| self.fold(*o));
                match condition.as_const().map(|lit| lit.to_value().is_true()) {
                    Some(true) => then,
                    Some(false) if otherwise.is_some() => otherwise.unwrap_or(then),
                    _ => Expr::Conditional {
                        condition: Box::new(condition),
                        then: Box::new(then),
                        otherwise: otherwise.map(Box::new),
                    },
                }
            }
            Expr::List(items) => Expr::List(items.into_iter().map(|e| self.fold(e)).collect()),
            Expr::Dict(pairs) => Expr::Dict(
                pairs
                    .into_iter()
                    .map(|(k, v)| (self.fold(k), self.fold(v)))
                    .collect(),
            ),
            Expr::GetAttr { obj, name } => Expr::GetAttr {
                obj: Box::new(self.fold(*obj)),
                name,
            },
            Expr::GetItem { obj, key } => Expr::GetItem {
                obj: Box::new(self.fold(*obj)),
                key: Box::new(self.fold(*key)),
            },
            Expr::Call { func, args, kwargs } => Expr::Call {
                func: Box::new(self.fold(*func)),
                args: self.fold_all(args),
                kwargs: self.fold_kwargs(kwargs),
            },
            Expr::Filter {
                expr,
                name,
                args,
                kwargs,
            } => Expr::Filter {
                expr: Box::new(self.fold(*expr)),
                name,
                args: self.fold_all(args),
                kwargs: self.fold_kwargs(kwargs),
            },
            Expr::Test {
                expr,
                name,
                args,
                negated,
            } => Expr::Test {
                expr: Box::new(self.fold(*expr)),
                name,
                args: self.fold_all(args),
                negated,
            },
            other => other,
        }
    }

    fn fold_all(&self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.fold(e)).collect()
    }

    fn fold_kwargs(&self, kwargs: Vec<(String, Expr)>) -> Vec<(String, Expr)> {
        kwargs
            .into_iter()
            .map(|(name, e)| (name, self.fold(e)))
            .collect()
    }

    fn fold_binary(&self, op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        let left = self.fold(left);
        let right = self.fold(right);

        // Logical operators short-circuit on a constant left side
        if op.is_logical() {
            if let Some(truthy) = left.as_const().map(|lit| lit.to_value().is_true()) {
                return match (op, truthy) {
                    (BinaryOperator::And, true) | (BinaryOperator::Or, false) => right,
                    _ => left,
                };
            }
        }

        if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
            if let Some(folded) = operators::binary(op, &l.to_value(), &r.to_value())
                .ok()
                .and_then(|v| Literal::from_value(&v))
            {
                return Expr::Const(folded);
            }
        }

        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

fn constant_text(literal: &Literal) -> Option<String> {
    literal.to_value().render().ok()
}
