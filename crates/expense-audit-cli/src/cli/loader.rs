//! Input file loading for the CLI
//!
//! - Rule files: YAML or JSON, either a list of rules or `{ rules: [...] }`
//! - Claims: JSON or YAML, one claim or a list
//! - Policies: YAML/JSON lists of documents, or Markdown/text files where
//!   the file stem is the document id and its first segment the category

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use expense_audit_core::indexer::PolicyDocument;
use expense_audit_core::rules::{Rule, RuleType};
use expense_audit_core::{AuditConfig, Claim};

/// Rule as written in a rule file
#[derive(Debug, Deserialize)]
pub struct RuleEntry {
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub source: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl RuleEntry {
    pub fn into_rule(self) -> Rule {
        let mut rule = Rule::new(self.code, self.name, self.rule_type, self.source).with_priority(self.priority);
        if let Some(id) = self.id {
            rule = rule.with_id(id);
        }
        if let Some(category) = self.category {
            rule = rule.with_category(category);
        }
        if let Some(message) = self.message {
            rule = rule.with_message(message);
        }
        rule.description = self.description;
        rule.enabled = self.enabled;
        rule
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Wrapped { rules: Vec<RuleEntry> },
    List(Vec<RuleEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn parse_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read(path)?;
    match extension(path).as_str() {
        "json" => serde_json::from_str(&content).with_context(|| format!("Invalid JSON in '{}'", path.display())),
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in '{}'", path.display()))
        }
        other => bail!("Unsupported file type '.{}' for '{}'", other, path.display()),
    }
}

/// Configuration file if given, otherwise defaults; environment wins either way
pub fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    let config = match path {
        Some(path) => AuditConfig::from_file(path)?.with_env_overrides(),
        None => AuditConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let file: RuleFile = parse_structured(path)?;
    let entries = match file {
        RuleFile::Wrapped { rules } => rules,
        RuleFile::List(rules) => rules,
    };
    Ok(entries.into_iter().map(RuleEntry::into_rule).collect())
}

/// The claim under audit; a file holding several claims must contain exactly one
pub fn load_claim(path: &Path) -> Result<Claim> {
    let mut claims = load_claims(path)?;
    if claims.len() != 1 {
        bail!("Expected one claim in '{}', found {}", path.display(), claims.len());
    }
    Ok(claims.remove(0))
}

pub fn load_claims(path: &Path) -> Result<Vec<Claim>> {
    let claims: OneOrMany<Claim> = parse_structured(path)?;
    Ok(claims.into_vec())
}

/// Load policy documents from files and directories
pub fn load_policies(paths: &[PathBuf]) -> Result<Vec<PolicyDocument>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to list '{}'", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    let mut documents = Vec::new();
    for file in files {
        match extension(&file).as_str() {
            "json" | "yaml" | "yml" => {
                let docs: OneOrMany<PolicyDocument> = parse_structured(&file)?;
                documents.extend(docs.into_vec());
            }
            "md" | "txt" => documents.push(text_policy(&file)?),
            _ => tracing::debug!(path = %file.display(), "Skipping non-policy file"),
        }
    }
    Ok(documents)
}

fn text_policy(path: &Path) -> Result<PolicyDocument> {
    let content = read(path)?;
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Policy file '{}' has no name", path.display()))?;
    let category = id.split(['-', '_']).next().unwrap_or(&id).to_string();
    let title = content
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .unwrap_or(&id)
        .to_string();

    Ok(PolicyDocument {
        id,
        title,
        category,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_wrapped_and_bare_rule_files() {
        let dir = TempDir::new().unwrap();
        let wrapped = write(
            &dir,
            "rules.yaml",
            "rules:\n  - code: AMT-001\n    name: Amount cap\n    type: amount\n    source: amount <= 2000\n    priority: 10\n    message: Too much\n",
        );
        let bare = write(
            &dir,
            "rules.json",
            r#"[{"code": "INV-001", "name": "Invoice", "type": "invoice", "source": "has_invoice", "enabled": false}]"#,
        );

        let rules = load_rules(&wrapped).unwrap();
        assert_eq!(rules[0].code, "AMT-001");
        assert_eq!(rules[0].priority, 10);
        assert_eq!(rules[0].message.as_deref(), Some("Too much"));

        let rules = load_rules(&bare).unwrap();
        assert_eq!(rules[0].rule_type, RuleType::Invoice);
        assert!(!rules[0].enabled);
    }

    #[test]
    fn test_text_policies_from_directory() {
        let dir = TempDir::new().unwrap();
        write(&dir, "travel-hotel.md", "# Hotel policy\n\nCapped at 500 per night.\n");
        write(&dir, "notes.bin", "ignored");

        let docs = load_policies(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "travel-hotel");
        assert_eq!(docs[0].category, "travel");
        assert_eq!(docs[0].title, "Hotel policy");
    }

    #[test]
    fn test_demo_inputs_load_and_compile() {
        use expense_audit_core::rules::{ExprRuleEngine, RuleEngine};

        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
        let rules = load_rules(&demos.join("rules.yaml")).unwrap();
        let engine = ExprRuleEngine::new();
        for rule in &rules {
            assert!(engine.validate(&rule.source).is_ok(), "{} does not compile", rule.code);
        }

        assert_eq!(load_claim(&demos.join("claim.json")).unwrap().amount, 2500.0);
        assert_eq!(load_claims(&demos.join("history.json")).unwrap().len(), 2);
        assert_eq!(load_policies(&[demos.join("policies")]).unwrap().len(), 3);
        assert!(load_config(Some(&demos.join("config.toml"))).is_ok());
    }

    #[test]
    fn test_claim_file_must_hold_one_claim() {
        let dir = TempDir::new().unwrap();
        let claim = r#"{"id": "c-1", "employee_id": "e", "claim_type": "meal", "category": "meal",
            "amount": 80.0, "expense_date": "2024-05-01", "submitted_at": "2024-05-02T09:00:00Z"}"#;
        let one = write(&dir, "claim.json", claim);
        let two = write(&dir, "claims.json", &format!("[{claim}, {claim}]"));

        assert_eq!(load_claim(&one).unwrap().id, "c-1");
        assert_eq!(load_claims(&two).unwrap().len(), 2);
        assert!(load_claim(&two).is_err());
    }
}
