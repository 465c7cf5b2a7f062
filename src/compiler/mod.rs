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

//! Template compiler
//!
//! Optimizes the parsed AST and lowers it to the bytecode executed by
//! [`crate::runtime::Vm`].

pub mod bytecode;
pub mod codegen;
pub mod optimizer;

pub use bytecode::{
    Bytecode, BytecodeBuilder, BytecodeMetadata, Instruction, Label, MacroInfo, NameIndex,
};
pub use codegen::{CodeGenerator, generate};
pub use optimizer::{OptimizationConfig, TemplateOptimizer};
