use std::collections::{BTreeMap, HashMap};

use super::error::{Result, WizardError};

/// Fields collected across the wizard steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Description,
    Roles,
    Members,
    ServiceAccounts,
    Permissions,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Description => "description",
            Field::Roles => "selected-roles",
            Field::Members => "selected-members",
            Field::ServiceAccounts => "selected-service-accounts",
            Field::Permissions => "selected-permissions",
        }
    }

    fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Field::Name | Field::Description, FieldValue::Text(_)) => true,
            (
                Field::Roles | Field::Members | Field::ServiceAccounts | Field::Permissions,
                FieldValue::Selection(_),
            ) => true,
            _ => false,
        }
    }
}

/// Identifiers picked on a selection step, keyed by id with a display label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(BTreeMap<String, String>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, label: impl Into<String>) {
        self.0.insert(id.into(), label.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }
}

impl<I: Into<String>, L: Into<String>> FromIterator<(I, L)> for Selection {
    fn from_iter<T: IntoIterator<Item = (I, L)>>(iter: T) -> Self {
        let mut selection = Selection::new();
        for (id, label) in iter {
            selection.insert(id, label);
        }
        selection
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Selection(Selection),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Selection(_) => None,
        }
    }

    pub fn as_selection(&self) -> Option<&Selection> {
        match self {
            FieldValue::Selection(selection) => Some(selection),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<Selection> for FieldValue {
    fn from(selection: Selection) -> Self {
        FieldValue::Selection(selection)
    }
}

/// Frozen copy of everything entered, as handed to submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    pub name: String,
    pub description: Option<String>,
    pub roles: Selection,
    pub members: Selection,
    pub service_accounts: Selection,
    pub permissions: Selection,
}

/// Values accumulated over one wizard session. Last write wins per field.
#[derive(Debug, Default)]
pub struct FieldStore {
    values: HashMap<Field, FieldValue>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<()> {
        if !field.accepts(&value) {
            return Err(WizardError::FieldType(field));
        }
        self.values.insert(field, value);
        Ok(())
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn selection(&self, field: Field) -> Option<&Selection> {
        self.get(field).and_then(FieldValue::as_selection)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Owned copy; later writes to the store never reach it
    pub fn snapshot(&self) -> FieldValues {
        let selection = |field| self.selection(field).cloned().unwrap_or_default();
        FieldValues {
            name: self.text(Field::Name).unwrap_or_default().trim().to_string(),
            description: self
                .text(Field::Description)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            roles: selection(Field::Roles),
            members: selection(Field::Members),
            service_accounts: selection(Field::ServiceAccounts),
            permissions: selection(Field::Permissions),
        }
    }
}
