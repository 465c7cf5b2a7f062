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

//! Message catalogue extension
//!
//! Registers `gettext`, its `_` alias and `ngettext` as globals that look
//! messages up in a catalogue, and publishes the catalogue's locale under the
//! `i18n.locale` extension data key.

use super::Environment;
use super::extension::Extension;
use crate::error::{Result, TemplateError};
use crate::model::{Kwargs, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// Translations for one locale
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    locale: String,
    messages: IndexMap<String, String>,
    plurals: IndexMap<String, (String, String)>,
}

impl Catalogue {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Self::default()
        }
    }

    /// Add a translation for a singular message
    pub fn message(mut self, id: impl Into<String>, translation: impl Into<String>) -> Self {
        self.messages.insert(id.into(), translation.into());
        self
    }

    /// Add singular and plural translations keyed by the singular message
    pub fn plural(
        mut self,
        id: impl Into<String>,
        singular: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        self.plurals
            .insert(id.into(), (singular.into(), plural.into()));
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn gettext(&self, message: &str) -> String {
        self.messages
            .get(message)
            .cloned()
            .unwrap_or_else(|| message.to_string())
    }

    pub fn ngettext(&self, singular: &str, plural: &str, n: i64) -> String {
        let (one, many) = match self.plurals.get(singular) {
            Some((one, many)) => (one.as_str(), many.as_str()),
            None => (singular, plural),
        };
        let chosen = if n == 1 { one } else { many };
        chosen.replace("%(num)s", &n.to_string())
    }
}

/// Extension exposing a [`Catalogue`] to templates
#[derive(Debug, Clone)]
pub struct I18nExtension {
    catalogue: Arc<Catalogue>,
}

impl I18nExtension {
    pub fn new(catalogue: Catalogue) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
        }
    }
}

fn string_arg(func: &str, args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(value) => value.render(),
        None => Err(TemplateError::evaluation(format!(
            "{func}() missing argument {}",
            index + 1
        ))),
    }
}

impl Extension for I18nExtension {
    fn identifier(&self) -> &str {
        "i18n"
    }

    fn bind(&self, environment: &mut Environment) -> Result<Arc<dyn Extension>> {
        let catalogue = Arc::clone(&self.catalogue);
        let gettext = Value::function("gettext", move |args: &[Value], _: &Kwargs| {
            Ok(Value::from(catalogue.gettext(&string_arg("gettext", args, 0)?)))
        });
        let catalogue = Arc::clone(&self.catalogue);
        let ngettext = Value::function("ngettext", move |args: &[Value], _: &Kwargs| {
            let singular = string_arg("ngettext", args, 0)?;
            let plural = string_arg("ngettext", args, 1)?;
            let n = args.get(2).and_then(Value::as_i64).unwrap_or(1);
            Ok(Value::from(catalogue.ngettext(&singular, &plural, n)))
        });

        environment.add_global("_", gettext.clone())?;
        environment.add_global("gettext", gettext)?;
        environment.add_global("ngettext", ngettext)?;
        environment.extend("i18n.locale", self.catalogue.locale())?;
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentOptions;
    use crate::environment::extension::ExtensionRef;
    use crate::model::Namespace;

    fn environment() -> Arc<Environment> {
        let catalogue = Catalogue::new("de")
            .message("Hello", "Hallo")
            .plural("%(num)s apple", "%(num)s Apfel", "%(num)s Äpfel");
        Environment::with_options(EnvironmentOptions {
            extensions: vec![ExtensionRef::new(I18nExtension::new(catalogue))],
            ..EnvironmentOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_gettext_globals() {
        let env = environment();
        let template = env
            .from_string("{{ _('Hello') }}, {{ gettext('Bye') }}", None)
            .unwrap();
        assert_eq!(template.render(Namespace::new()).unwrap(), "Hallo, Bye");
    }

    #[test]
    fn test_ngettext_picks_plural_form() {
        let env = environment();
        let template = env
            .from_string("{{ ngettext('%(num)s apple', '%(num)s apples', n) }}", None)
            .unwrap();
        assert_eq!(template.render([("n", 1)]).unwrap(), "1 Apfel");
        assert_eq!(template.render([("n", 3)]).unwrap(), "3 Äpfel");
    }

    #[test]
    fn test_locale_is_published_as_extension_data() {
        let env = environment();
        assert_eq!(env.extension_data("i18n.locale"), Some(Value::from("de")));
        assert!(env.extension("i18n").is_some());
    }
}
