//! Encrypted field registry
// Copyright 2025 Francisco F. Pinochet
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


/// Model fields stored as ciphertext, grouped by model
pub const ENCRYPTED_FIELDS: &[(&str, &[&str])] = &[
    ("bills", &["memo", "payment_reference"]),
    ("customers", &["email", "phone", "tax_id"]),
    ("invoices", &["bank_details", "notes"]),
    ("vendors", &["bank_account_number", "routing_number", "tax_id"]),
];

/// One encrypted column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedField {
    pub model_name: String,
    pub field_name: String,
}

/// The (model, field) pairs a rotation has to migrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFieldRegistry {
    fields: Vec<EncryptedField>,
}

impl EncryptedFieldRegistry {
    /// Registry over an explicit list of pairs, in the given order
    pub fn new<M, F>(pairs: impl IntoIterator<Item = (M, F)>) -> Self
    where
        M: Into<String>,
        F: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(model, field)| EncryptedField {
                    model_name: model.into(),
                    field_name: field.into(),
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[EncryptedField] {
        &self.fields
    }

    pub fn contains(&self, model_name: &str, field_name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.model_name == model_name && f.field_name == field_name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for EncryptedFieldRegistry {
    fn default() -> Self {
        Self::new(
            ENCRYPTED_FIELDS
                .iter()
                .flat_map(|(model, fields)| fields.iter().map(move |field| (*model, *field))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = EncryptedFieldRegistry::default();
        assert_eq!(registry.fields().len(), 10);
        assert!(registry.contains("vendors", "tax_id"));
        assert!(!registry.contains("vendors", "name"));
    }

    #[test]
    fn test_custom_registry_keeps_order() {
        let registry = EncryptedFieldRegistry::new([("b", "y"), ("a", "x")]);
        assert_eq!(registry.fields()[0].model_name, "b");
        assert_eq!(registry.fields()[1].field_name, "x");
    }
}
