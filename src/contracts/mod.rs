//! Contract validation (C2).
//!
//! A contract is a named schema + semantic-rule pair loaded from YAML. The
//! schema half is a small structural shape-checker (required fields,
//! primitive type tags, nested shape) rather than a full JSON-Schema engine,
//! in the same declarative-rule spirit as the conformance layer's checks —
//! no artifact crosses a stage boundary without `passed = true`.

use crate::errors::ContractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub schema: SchemaShape,
    #[serde(default)]
    pub validation: Vec<SemanticRule>,
}

/// A structural shape a JSON value must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaShape {
    #[serde(default)]
    pub required_fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

/// A semantic rule: a field must match a regex, or a field must be one of a
/// fixed set of values. Kept deliberately small — concrete validators beyond
/// shape + simple rules are external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRule {
    pub field: String,
    #[serde(flatten)]
    pub rule: RuleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Matches { pattern: String },
    OneOf { values: Vec<String> },
    NonEmpty,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<String>,
    pub artifact_hash: String,
}

#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, Contract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: Contract) {
        self.contracts.insert(contract.name.clone(), contract);
    }

    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ContractError> {
        let mut loaded = 0;
        if !dir.exists() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(dir).map_err(|e| ContractError::LoadFailed {
            path: dir.to_path_buf(),
            source: e,
        })? {
            let entry = entry.map_err(|e| ContractError::LoadFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| ContractError::LoadFailed {
                path: path.clone(),
                source: e,
            })?;
            let contract: Contract = serde_yaml::from_str(&content)
                .map_err(|e| ContractError::MalformedSchema(path.display().to_string(), e.to_string()))?;
            self.register(contract);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    /// Validate a JSON artifact against a registered contract.
    pub fn validate(&self, artifact: &Value, contract_name: &str) -> Result<ValidationResult, ContractError> {
        let contract = self
            .get(contract_name)
            .ok_or_else(|| ContractError::UnknownContract(contract_name.to_string()))?;

        let mut errors = Vec::new();
        for field in &contract.schema.required_fields {
            match artifact.get(&field.name) {
                None => errors.push(format!("missing required field: {}", field.name)),
                Some(value) => {
                    if !type_matches(value, field.ty) {
                        errors.push(format!(
                            "field '{}' has wrong type, expected {:?}",
                            field.name, field.ty
                        ));
                    }
                }
            }
        }

        for rule in &contract.validation {
            if let Some(value) = artifact.get(&rule.field) {
                if let Some(msg) = check_rule(&rule.field, value, &rule.rule) {
                    errors.push(msg);
                }
            }
        }

        let canonical = serde_json::to_vec(artifact).unwrap_or_default();
        let hash = crate::state::hash_bytes(&canonical);

        Ok(ValidationResult {
            passed: errors.is_empty(),
            errors,
            artifact_hash: hash,
        })
    }
}

fn type_matches(value: &Value, ty: FieldType) -> bool {
    match ty {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Any => true,
    }
}

fn check_rule(field: &str, value: &Value, rule: &RuleKind) -> Option<String> {
    match rule {
        RuleKind::Matches { pattern } => {
            let re = regex::Regex::new(pattern).ok()?;
            let text = value.as_str().unwrap_or_default();
            if re.is_match(text) {
                None
            } else {
                Some(format!("field '{field}' does not match pattern '{pattern}'"))
            }
        }
        RuleKind::OneOf { values } => {
            let text = value.as_str().unwrap_or_default();
            if values.iter().any(|v| v == text) {
                None
            } else {
                Some(format!("field '{field}' must be one of {values:?}"))
            }
        }
        RuleKind::NonEmpty => {
            let empty = match value {
                Value::String(s) => s.is_empty(),
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            };
            if empty {
                Some(format!("field '{field}' must be non-empty"))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_contract() -> Contract {
        Contract {
            name: "spec-output".into(),
            schema: SchemaShape {
                required_fields: vec![
                    FieldSpec {
                        name: "goal".into(),
                        ty: FieldType::String,
                    },
                    FieldSpec {
                        name: "acceptance_criteria".into(),
                        ty: FieldType::Array,
                    },
                ],
            },
            validation: vec![SemanticRule {
                field: "goal".into(),
                rule: RuleKind::NonEmpty,
            }],
        }
    }

    #[test]
    fn validate_passes_for_conforming_artifact() {
        let mut registry = ContractRegistry::new();
        registry.register(spec_contract());
        let artifact = json!({"goal": "Add OAuth2", "acceptance_criteria": ["PKCE supported"]});
        let result = registry.validate(&artifact, "spec-output").unwrap();
        assert!(result.passed);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn validate_reports_missing_field() {
        let mut registry = ContractRegistry::new();
        registry.register(spec_contract());
        let artifact = json!({"goal": "Add OAuth2"});
        let result = registry.validate(&artifact, "spec-output").unwrap();
        assert!(!result.passed);
        assert!(result.errors.iter().any(|e| e.contains("acceptance_criteria")));
    }

    #[test]
    fn validate_reports_empty_required_string() {
        let mut registry = ContractRegistry::new();
        registry.register(spec_contract());
        let artifact = json!({"goal": "", "acceptance_criteria": []});
        let result = registry.validate(&artifact, "spec-output").unwrap();
        assert!(!result.passed);
        assert!(result.errors.iter().any(|e| e.contains("non-empty")));
    }

    #[test]
    fn validate_unknown_contract_errors() {
        let registry = ContractRegistry::new();
        let result = registry.validate(&json!({}), "nope");
        assert!(matches!(result, Err(ContractError::UnknownContract(_))));
    }

    #[test]
    fn identical_artifacts_hash_identically() {
        let mut registry = ContractRegistry::new();
        registry.register(spec_contract());
        let artifact = json!({"goal": "Add OAuth2", "acceptance_criteria": ["PKCE"]});
        let r1 = registry.validate(&artifact, "spec-output").unwrap();
        let r2 = registry.validate(&artifact, "spec-output").unwrap();
        assert_eq!(r1.artifact_hash, r2.artifact_hash);
    }
}
