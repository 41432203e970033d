use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// terraform-docs `json` output, as far as the registry consumes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformDocs {
    pub header: Option<String>,
    pub footer: Option<String>,
    pub inputs: Vec<DocsInput>,
    pub outputs: Vec<DocsOutput>,
    pub modules: Vec<DocsModuleCall>,
    pub providers: Vec<DocsProvider>,
    pub requirements: Vec<DocsRequirement>,
    pub resources: Vec<DocsResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsInput {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsOutput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsModuleCall {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsProvider {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsRequirement {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsResource {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInput {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub description: String,
    pub default: Option<serde_json::Value>,
    pub required: bool,
    pub sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub name: String,
    pub description: String,
    pub sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResource {
    /// Full resource type, e.g. `aws_instance`.
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    /// `managed` or `data`.
    pub mode: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCall {
    pub name: String,
    pub source: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequirement {
    pub name: String,
    /// `namespace/name` registry source, when known.
    pub source: String,
    pub version: String,
}

/// Normalised analysis of one module directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleRecord {
    pub inputs: Vec<ModuleInput>,
    pub outputs: Vec<ModuleOutput>,
    pub resources: Vec<ModuleResource>,
    pub data_sources: Vec<ModuleResource>,
    pub module_calls: Vec<ModuleCall>,
    pub provider_requirements: Vec<ProviderRequirement>,
    pub readme: Option<Vec<u8>>,
    /// No `.tf` files in the directory.
    pub empty: bool,
}

impl TerraformDocs {
    /// Parse and validate analyzer stdout.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::extraction(format!("analyzer output is not JSON: {e}"), ""))?;
        if !value.is_object() {
            return Err(Error::extraction(
                "analyzer output is not a JSON object",
                "",
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::extraction(format!("analyzer output has an invalid schema: {e}"), ""))
    }

    /// Build the registry view of this analysis.
    #[must_use]
    pub fn to_record(&self, readme: Option<Vec<u8>>, empty: bool) -> ModuleRecord {
        let mut inputs: Vec<ModuleInput> = self
            .inputs
            .iter()
            .map(|i| ModuleInput {
                name: i.name.clone(),
                type_: i.type_.clone().unwrap_or_else(|| "any".to_string()),
                description: i.description.clone().unwrap_or_default(),
                default: i.default.clone().filter(|d| !d.is_null()),
                required: i.required,
                sensitive: i.sensitive,
            })
            .collect();
        inputs.sort_by(|a, b| a.name.cmp(&b.name));

        let mut outputs: Vec<ModuleOutput> = self
            .outputs
            .iter()
            .map(|o| ModuleOutput {
                name: o.name.clone(),
                description: o.description.clone().unwrap_or_default(),
                sensitive: o.sensitive,
            })
            .collect();
        outputs.sort_by(|a, b| a.name.cmp(&b.name));

        let (mut data_sources, mut resources): (Vec<_>, Vec<_>) = self
            .resources
            .iter()
            .map(|r| {
                let provider = r.provider.clone().unwrap_or_default();
                let type_ = if provider.is_empty() || r.type_.starts_with(&format!("{provider}_")) {
                    r.type_.clone()
                } else {
                    format!("{provider}_{}", r.type_)
                };
                ModuleResource {
                    type_,
                    name: r.name.clone(),
                    mode: r.mode.clone().unwrap_or_else(|| "managed".to_string()),
                    provider,
                }
            })
            .partition(|r| r.mode == "data");
        resources.sort_by(|a, b| (&a.type_, &a.name).cmp(&(&b.type_, &b.name)));
        data_sources.sort_by(|a, b| (&a.type_, &a.name).cmp(&(&b.type_, &b.name)));

        let mut module_calls: Vec<ModuleCall> = self
            .modules
            .iter()
            .map(|m| ModuleCall {
                name: m.name.clone(),
                source: m.source.clone(),
                version: m.version.clone().unwrap_or_default(),
            })
            .collect();
        module_calls.sort_by(|a, b| a.name.cmp(&b.name));

        ModuleRecord {
            inputs,
            outputs,
            resources,
            data_sources,
            module_calls,
            provider_requirements: self.provider_requirements(),
            readme,
            empty,
        }
    }

    fn provider_requirements(&self) -> Vec<ProviderRequirement> {
        let mut merged: BTreeMap<String, ProviderRequirement> = BTreeMap::new();

        let declared = self
            .requirements
            .iter()
            .filter(|r| r.name != "terraform")
            .map(|r| (&r.name, &r.version))
            .chain(self.providers.iter().map(|p| (&p.name, &p.version)));
        for (name, version) in declared {
            let entry = merged.entry(name.clone()).or_insert_with(|| ProviderRequirement {
                name: name.clone(),
                source: String::new(),
                version: String::new(),
            });
            if entry.version.is_empty() {
                entry.version = version.clone().unwrap_or_default();
            }
        }

        for resource in &self.resources {
            let (Some(provider), Some(source)) = (&resource.provider, &resource.source) else {
                continue;
            };
            if let Some(entry) = merged.get_mut(provider) {
                if entry.source.is_empty() {
                    entry.source = source.clone();
                }
            }
        }

        merged.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "header": "",
        "inputs": [
            {"name": "vpc_cidr", "type": "string", "description": "CIDR", "default": "10.0.0.0/16", "required": false},
            {"name": "name", "type": "string", "description": null, "default": null, "required": true}
        ],
        "modules": [{"name": "subnets", "source": "./modules/subnets", "version": null}],
        "outputs": [{"name": "vpc_id", "description": "The VPC", "sensitive": false}],
        "providers": [{"name": "aws", "alias": null, "version": ">= 5.0"}],
        "requirements": [{"name": "terraform", "version": ">= 1.3"}, {"name": "aws", "version": ">= 5.0"}],
        "resources": [
            {"type": "vpc", "name": "this", "provider": "aws", "source": "hashicorp/aws", "mode": "managed"},
            {"type": "availability_zones", "name": "all", "provider": "aws", "source": "hashicorp/aws", "mode": "data"}
        ]
    }"#;

    #[test]
    fn test_normalise_sample() {
        let docs = TerraformDocs::parse(SAMPLE).unwrap();
        let record = docs.to_record(Some(b"# VPC".to_vec()), false);

        assert_eq!(record.inputs[0].name, "name");
        assert!(record.inputs[0].required);
        assert_eq!(record.inputs[0].default, None);
        assert_eq!(record.inputs[1].default, Some(serde_json::json!("10.0.0.0/16")));

        assert_eq!(record.resources.len(), 1);
        assert_eq!(record.resources[0].type_, "aws_vpc");
        assert_eq!(record.data_sources[0].type_, "aws_availability_zones");
        assert_eq!(record.module_calls[0].source, "./modules/subnets");

        assert_eq!(
            record.provider_requirements,
            [ProviderRequirement {
                name: "aws".into(),
                source: "hashicorp/aws".into(),
                version: ">= 5.0".into(),
            }]
        );
    }

    #[test]
    fn test_empty_object_is_valid() {
        let record = TerraformDocs::parse("{}").unwrap().to_record(None, true);
        assert!(record.inputs.is_empty());
        assert!(record.empty);
    }

    #[test]
    fn test_invalid_schema_rejected() {
        for raw in ["not json", "[]", r#"{"inputs": [{"type": "string"}]}"#, r#"{"inputs": 3}"#] {
            assert!(
                matches!(TerraformDocs::parse(raw), Err(Error::ExtractionFailed { .. })),
                "{raw}"
            );
        }
    }
}
