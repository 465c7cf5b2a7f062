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

use super::{Loader, LoaderSource};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use std::fmt;

type SourceFn = dyn Fn(&str) -> Option<LoaderSource> + Send + Sync;

/// Loader backed by a closure returning the source for a name
pub struct FunctionLoader {
    func: Box<SourceFn>,
}

impl FunctionLoader {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&str) -> Option<LoaderSource> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

impl Loader for FunctionLoader {
    fn get_source(&self, _: &Environment, name: &str) -> Result<LoaderSource> {
        (self.func)(name).ok_or_else(|| TemplateError::not_found(name))
    }
}

impl fmt::Debug for FunctionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionLoader")
    }
}
