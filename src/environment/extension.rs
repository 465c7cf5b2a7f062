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

//! Environment extensions
//!
//! An extension registers filters, tests, globals and extension data on the
//! environment it is bound to. Binding happens while the environment is still
//! being built, so registration never trips the frozen check. Overlays bind
//! every parent extension again to the new environment.

use super::Environment;
use crate::error::Result;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A pluggable environment extension
pub trait Extension: Send + Sync + fmt::Debug {
    /// Identifier extensions are keyed by; a later extension with the same
    /// identifier replaces an earlier one
    fn identifier(&self) -> &str;

    /// Register this extension on `environment` and return the bound instance
    fn bind(&self, environment: &mut Environment) -> Result<Arc<dyn Extension>>;
}

/// Shared handle to an extension prototype, compared by identity
#[derive(Clone)]
pub struct ExtensionRef(Arc<dyn Extension>);

impl ExtensionRef {
    pub fn new(extension: impl Extension + 'static) -> Self {
        Self(Arc::new(extension))
    }

    pub fn identifier(&self) -> &str {
        self.0.identifier()
    }

    pub(crate) fn bind(&self, environment: &mut Environment) -> Result<Arc<dyn Extension>> {
        self.0.bind(environment)
    }
}

impl From<Arc<dyn Extension>> for ExtensionRef {
    fn from(extension: Arc<dyn Extension>) -> Self {
        Self(extension)
    }
}

impl PartialEq for ExtensionRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ExtensionRef {}

impl Hash for ExtensionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for ExtensionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extension({})", self.identifier())
    }
}
