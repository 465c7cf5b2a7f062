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

//! Template runtime
//!
//! Attribute/item resolution, operator semantics, the per-render
//! [`Context`], macros and the bytecode [`Vm`].

pub mod context;
pub mod macros;
pub mod operators;
pub mod resolver;
pub mod vm;

pub use context::{BlockRef, Context};
pub use macros::Macro;
pub use resolver::{getattr, getitem, resolve};
pub use vm::Vm;
