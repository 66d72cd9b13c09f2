//! Template and macro registries.
//!
//! Each registry is an explicitly owned object handed to the components that
//! read it; nothing is process-global. Registration may happen at any time
//! (catalog loading, API calls) while matches are running.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use voxline_domain::command_macro::Macro;
use voxline_domain::error::VoxlineError;
use voxline_domain::template::Template;

/// Registered templates in registration order.
///
/// Order matters: when two patterns score the same, the template registered
/// first wins.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<Vec<Template>>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, replacing (in place) one with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] if the template is invalid.
    pub fn register(&self, template: Template) -> Result<(), VoxlineError> {
        template.validate()?;
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        match templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => templates.push(template),
        }
        Ok(())
    }

    /// Remove a template by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        let before = templates.len();
        templates.retain(|t| t.name != name);
        templates.len() != before
    }

    /// Copy of the current templates, for scoring off the async runtime.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Template> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registered macros keyed by lower-cased name.
#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: RwLock<HashMap<String, Macro>>,
}

impl MacroRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a macro.
    ///
    /// # Errors
    ///
    /// Returns [`VoxlineError::Validation`] if the macro is invalid.
    pub fn register(&self, command_macro: Macro) -> Result<(), VoxlineError> {
        command_macro.validate()?;
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command_macro.name.to_lowercase(), command_macro);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Macro> {
        self.macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.trim().to_lowercase())
            .cloned()
    }

    /// The macro invoked by `text`, if any.
    ///
    /// Accepts the bare name as well as `run <name>` and `run macro <name>`,
    /// ignoring case and trailing punctuation.
    #[must_use]
    pub fn find_invocation(&self, text: &str) -> Option<Macro> {
        let normalised = text
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_lowercase();
        let name = normalised
            .strip_prefix("run macro ")
            .or_else(|| normalised.strip_prefix("run "))
            .unwrap_or(&normalised);
        self.get(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.macros.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
