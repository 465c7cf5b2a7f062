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

//! Expression AST node definitions

use super::operator::{BinaryOperator, UnaryOperator};
use crate::model::Value;

/// Literal constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `none`
    None,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// String literal
    String(String),
}

impl Literal {
    /// Convert to a runtime value
    pub fn to_value(&self) -> Value {
        match self {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::from(s.as_str()),
        }
    }

    /// Convert a runtime value back into a literal, if it has a literal form
    pub fn from_value(value: &Value) -> Option<Literal> {
        match value {
            Value::None => Some(Literal::None),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Integer(i) => Some(Literal::Integer(*i)),
            Value::Float(f) => Some(Literal::Float(*f)),
            Value::String(s) => Some(Literal::String(s.to_string())),
            _ => None,
        }
    }
}

/// AST representation of template expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Const(Literal),

    /// Variable reference
    Name(String),

    /// List literal
    List(Vec<Expr>),

    /// Dict literal
    Dict(Vec<(Expr, Expr)>),

    /// Attribute access (obj.name)
    GetAttr {
        /// Object expression
        obj: Box<Expr>,
        /// Attribute name
        name: String,
    },

    /// Item access (obj\[key\])
    GetItem {
        /// Object expression
        obj: Box<Expr>,
        /// Key expression
        key: Box<Expr>,
    },

    /// Call expression
    Call {
        /// Callee
        func: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        kwargs: Vec<(String, Expr)>,
    },

    /// Filter application (expr | name(args))
    Filter {
        /// Filtered value
        expr: Box<Expr>,
        /// Filter name
        name: String,
        /// Extra positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        kwargs: Vec<(String, Expr)>,
    },

    /// Test application (expr is \[not\] name(args))
    Test {
        /// Tested value
        expr: Box<Expr>,
        /// Test name
        name: String,
        /// Extra positional arguments
        args: Vec<Expr>,
        /// Whether the result is negated
        negated: bool,
    },

    /// Unary operation
    Unary {
        /// The operator
        op: UnaryOperator,
        /// The operand
        operand: Box<Expr>,
    },

    /// Binary operation
    Binary {
        /// The operator
        op: BinaryOperator,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },

    /// Conditional expression (a if cond else b)
    Conditional {
        /// Condition
        condition: Box<Expr>,
        /// Value when the condition holds
        then: Box<Expr>,
        /// Value otherwise; undefined when absent
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Literal constant of this expression, if it is one
    pub fn as_const(&self) -> Option<&Literal> {
        match self {
            Expr::Const(lit) => Some(lit),
            _ => None,
        }
    }

    /// Create a string constant
    pub fn string(s: impl Into<String>) -> Self {
        Expr::Const(Literal::String(s.into()))
    }
}
