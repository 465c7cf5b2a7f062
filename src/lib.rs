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

//! Template engine with a bytecode compiler
//!
//! An [`Environment`] holds syntax settings, filters, tests, globals, a
//! [`Loader`](loader::Loader) and a template cache. Templates are parsed,
//! optimized and compiled to bytecode once, then rendered any number of
//! times by a small virtual machine that produces output lazily.
//!
//! ```rust
//! use octofhir_templates::{Environment, Namespace};
//!
//! let env = Environment::new();
//! let template = env.from_string("Hello {{ name }}!", None)?;
//! assert_eq!(template.render([("name", "World")])?, "Hello World!");
//! # Ok::<(), octofhir_templates::TemplateError>(())
//! ```

pub mod ast;
pub mod compiler;
pub mod environment;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod registry;
pub mod runtime;
pub mod template;

pub use environment::{
    Environment, EnvironmentOptions, Extension, ExtensionRef, Finalizer, OverlayOptions, Syntax,
    TemplateOptions,
};
pub use error::{Result, SourceLocation, TemplateError};
pub use loader::{FileSystemLoader, FunctionLoader, Loader, LoaderSource, MapLoader};
pub use model::{Function, Globals, Kwargs, Namespace, Object, Undefined, UndefinedPolicy, Value};
pub use template::{Template, TemplateGenerator, TemplateModule, TemplateStream};
