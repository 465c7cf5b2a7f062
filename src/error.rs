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

//! Error types for template compilation and rendering
//!
//! Every fallible operation in the crate returns [`TemplateError`]. Syntax and
//! runtime failures carry a [`SourceLocation`] pointing at the template source
//! line once they leave the environment or a render call.

use std::fmt;
use thiserror::Error;

/// Result type alias for template operations
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Placeholder filename for templates that were not loaded from anywhere
pub const DEFAULT_FILENAME: &str = "<template>";

/// Source location information for error reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Load name of the template, `None` for in-memory templates
    pub name: Option<String>,
    /// Filename used for diagnostics
    pub filename: String,
    /// Template source line (1-based)
    pub line: usize,
}

impl SourceLocation {
    /// Create a new source location
    pub fn new(name: Option<String>, filename: impl Into<String>, line: usize) -> Self {
        Self {
            name,
            filename: filename.into(),
            line,
        }
    }

    /// Location with only a line number, filled in later by the environment
    pub(crate) fn line_only(line: usize) -> Self {
        Self {
            name: None,
            filename: DEFAULT_FILENAME.to_string(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, line {}", self.filename, self.line)
    }
}

fn fmt_location(location: &Option<SourceLocation>) -> String {
    location
        .as_ref()
        .map(|l| format!(" ({l})"))
        .unwrap_or_default()
}

/// Comprehensive error type for template operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// Invalid environment configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
    },

    /// `get_template` was called on an environment without a loader
    #[error("No loader for this environment specified")]
    NoLoaderConfigured,

    /// The loader could not find the requested template
    #[error("Template not found: {name}")]
    TemplateNotFound {
        /// Name the template was requested under
        name: String,
    },

    /// Lexing or parsing failed
    #[error("Syntax error: {message} ({location})")]
    Syntax {
        /// Human-readable error message
        message: String,
        /// Where in the template source the error was detected
        location: SourceLocation,
    },

    /// A caller passed an argument outside the accepted range
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable error message
        message: String,
    },

    /// The environment can no longer be modified
    #[error("Environment is frozen: {message}")]
    Frozen {
        /// Human-readable error message
        message: String,
    },

    /// A strict undefined value was used
    #[error("Undefined error: {message}{}", fmt_location(location))]
    Undefined {
        /// Human-readable error message
        message: String,
        /// Template location the failure was raised at
        location: Option<SourceLocation>,
    },

    /// Runtime evaluation errors
    #[error("Evaluation error: {message}{}", fmt_location(location))]
    Evaluation {
        /// Human-readable error message
        message: String,
        /// Template location the failure was raised at
        location: Option<SourceLocation>,
    },

    /// Reading template source or writing output failed
    #[error("I/O error for '{name}': {message}")]
    Io {
        /// Template name or output target
        name: String,
        /// Underlying error message
        message: String,
    },
}

impl TemplateError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a template-not-found error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::TemplateNotFound { name: name.into() }
    }

    /// Create a syntax error at the given source line
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            location: SourceLocation::line_only(line),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a frozen-environment error
    pub fn frozen(message: impl Into<String>) -> Self {
        Self::Frozen {
            message: message.into(),
        }
    }

    /// Create an undefined error without location
    pub fn undefined(message: impl Into<String>) -> Self {
        Self::Undefined {
            message: message.into(),
            location: None,
        }
    }

    /// Create an evaluation error without location
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
            location: None,
        }
    }

    /// Create an I/O error
    pub fn io(name: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            name: name.into(),
            message: err.to_string(),
        }
    }

    /// Template location attached to this error, if any
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Syntax { location, .. } => Some(location),
            Self::Undefined { location, .. } | Self::Evaluation { location, .. } => {
                location.as_ref()
            }
            _ => None,
        }
    }

    /// Template source line of this error, if known
    pub fn line(&self) -> Option<usize> {
        self.location().map(|l| l.line)
    }

    /// Attach a template location to a runtime error.
    ///
    /// The innermost location wins: an error that already carries one keeps it.
    /// Other variants pass through untouched.
    pub(crate) fn with_location(self, location: SourceLocation) -> Self {
        match self {
            Self::Undefined {
                message,
                location: None,
            } => Self::Undefined {
                message,
                location: Some(location),
            },
            Self::Evaluation {
                message,
                location: None,
            } => Self::Evaluation {
                message,
                location: Some(location),
            },
            other => other,
        }
    }

    /// Rewrite a syntax error so it reports the given template name and filename.
    pub(crate) fn with_template(self, name: Option<&str>, filename: &str) -> Self {
        match self {
            Self::Syntax { message, location } => Self::Syntax {
                message,
                location: SourceLocation::new(
                    name.map(str::to_string),
                    filename,
                    location.line,
                ),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_location_keeps_innermost() {
        let inner = SourceLocation::new(Some("inner.html".into()), "inner.html", 3);
        let outer = SourceLocation::new(Some("outer.html".into()), "outer.html", 9);

        let err = TemplateError::evaluation("boom")
            .with_location(inner.clone())
            .with_location(outer);

        assert_eq!(err.location(), Some(&inner));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_with_template_rewrites_syntax_location() {
        let err = TemplateError::syntax("unexpected end", 4).with_template(Some("a.html"), "a.html");

        match err {
            TemplateError::Syntax { location, .. } => {
                assert_eq!(location.name.as_deref(), Some("a.html"));
                assert_eq!(location.filename, "a.html");
                assert_eq!(location.line, 4);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_display_includes_location() {
        let err = TemplateError::evaluation("division by zero")
            .with_location(SourceLocation::new(None, DEFAULT_FILENAME, 2));

        assert_eq!(
            err.to_string(),
            "Evaluation error: division by zero (<template>, line 2)"
        );
    }

    #[test]
    fn test_other_variants_ignore_location() {
        let err = TemplateError::NoLoaderConfigured
            .with_location(SourceLocation::new(None, DEFAULT_FILENAME, 2));
        assert_eq!(err, TemplateError::NoLoaderConfigured);
        assert!(err.location().is_none());
    }
}
