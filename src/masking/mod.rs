//! Sensitive field detection and masking
//!
//! Runs before WAL persistence so no sensitive value is ever stored.
//! Rules: a global baseline key set, per-tenant additional keys, and a
//! fixed heuristic substring list. Matched values are rewritten by a
//! partial rule (keep prefix/suffix, email shape) or fully masked.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error};

use crate::auth::token_display;

/// Heuristic substrings that flag a key as sensitive regardless of
/// configured rules. Intentionally conservative: `key` also matches
/// benign fields like `request_key`; operators narrow via config.
const HEURISTIC_SUBSTRINGS: [&str; 15] = [
    "card", "credit", "ssn", "social", "phone", "email", "pass", "pwd", "key", "token", "auth",
    "secret", "private", "confidential", "sensitive",
];

/// Recursion guard for malformed value trees. The validator caps
/// metadata depth far below this; hitting it means the entry bypassed
/// validation and gets the redaction fallback instead of a panic.
const TRAVERSAL_DEPTH_MAX: usize = 64;

/// Partial masking rule for a specific key.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_prefix: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_suffix: Option<usize>,
    #[serde(default)]
    pub mask_email: bool,
}

/// Masking configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Key names always masked (case-insensitive)
    pub baseline_keys: Vec<String>,
    /// Partial masking rules keyed by field name
    pub partial_rules: BTreeMap<String, PartialRule>,
    /// Additional masked keys per tenant token
    pub tenant_overrides: HashMap<String, Vec<String>>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        let mut partial_rules = BTreeMap::new();
        partial_rules.insert(
            "authorization".to_string(),
            PartialRule {
                keep_prefix: Some(5),
                ..Default::default()
            },
        );
        Self {
            baseline_keys: vec![
                "password".to_string(),
                "token".to_string(),
                "authorization".to_string(),
                "api_key".to_string(),
                "secret".to_string(),
                "card_number".to_string(),
            ],
            partial_rules,
            tenant_overrides: HashMap::new(),
        }
    }
}

/// Applies masking rules to decoded log entries.
///
/// Read-only after construction; `mask_entry` is pure on its input.
pub struct MaskingEngine {
    baseline_keys: Vec<String>,
    partial_rules: BTreeMap<String, PartialRule>,
    tenant_overrides: HashMap<String, Vec<String>>,
}

impl MaskingEngine {
    pub fn new(config: &MaskingConfig) -> Self {
        Self {
            baseline_keys: lowercased(&config.baseline_keys),
            partial_rules: config
                .partial_rules
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            tenant_overrides: config
                .tenant_overrides
                .iter()
                .map(|(token, keys)| (token.clone(), lowercased(keys)))
                .collect(),
        }
    }

    /// Mask one entry for the given tenant. Returns a masked deep copy;
    /// the input is never mutated.
    pub fn mask_entry(&self, entry: &Value, token: &str) -> Result<Value, String> {
        let mask_keys = self.mask_keys_for(token);
        self.copy_and_mask(entry, &mask_keys, 0)
    }

    /// Mask a batch. A failure in one entry never fails the batch: the
    /// failing entry is replaced by a redaction stub naming only its
    /// top-level keys.
    pub fn mask_entries(&self, entries: &[Value], token: &str) -> Vec<Value> {
        entries
            .iter()
            .map(|entry| match self.mask_entry(entry, token) {
                Ok(masked) => masked,
                Err(reason) => {
                    error!(
                        token = %token_display(token),
                        error = %reason,
                        "failed to mask log entry, storing redaction stub"
                    );
                    redaction_stub(entry)
                }
            })
            .collect()
    }

    fn mask_keys_for(&self, token: &str) -> HashSet<&str> {
        let mut keys: HashSet<&str> = self.baseline_keys.iter().map(String::as_str).collect();
        if let Some(overrides) = self.tenant_overrides.get(token) {
            keys.extend(overrides.iter().map(String::as_str));
        }
        keys
    }

    fn copy_and_mask(
        &self,
        value: &Value,
        mask_keys: &HashSet<&str>,
        depth: usize,
    ) -> Result<Value, String> {
        if depth > TRAVERSAL_DEPTH_MAX {
            return Err(format!("value nesting exceeds {TRAVERSAL_DEPTH_MAX} levels"));
        }
        match value {
            Value::Object(map) => {
                let mut masked = serde_json::Map::with_capacity(map.len());
                for (key, child) in map {
                    if self.should_mask(key, mask_keys) {
                        let rewritten = self.mask_value(key, child);
                        debug!(field = %key, "masked sensitive field");
                        masked.insert(key.clone(), Value::String(rewritten));
                    } else {
                        masked.insert(key.clone(), self.copy_and_mask(child, mask_keys, depth + 1)?);
                    }
                }
                Ok(Value::Object(masked))
            }
            Value::Array(items) => {
                let mut masked = Vec::with_capacity(items.len());
                for item in items {
                    masked.push(self.copy_and_mask(item, mask_keys, depth + 1)?);
                }
                Ok(Value::Array(masked))
            }
            primitive => Ok(primitive.clone()),
        }
    }

    fn should_mask(&self, key: &str, mask_keys: &HashSet<&str>) -> bool {
        let key_lower = key.to_lowercase();

        for mask_key in mask_keys {
            if key_lower == *mask_key || key_lower.contains(mask_key) {
                return true;
            }
        }

        HEURISTIC_SUBSTRINGS
            .iter()
            .any(|pattern| key_lower.contains(pattern))
    }

    fn mask_value(&self, key: &str, value: &Value) -> String {
        let str_value = stringify(value);
        let key_lower = key.to_lowercase();

        // Exact rule match wins over substring matches.
        if let Some(rule) = self.partial_rules.get(&key_lower) {
            return apply_partial(&str_value, rule);
        }
        for (rule_key, rule) in &self.partial_rules {
            if key_lower.contains(rule_key.as_str()) {
                return apply_partial(&str_value, rule);
            }
        }

        full_mask(&str_value)
    }
}

fn lowercased(keys: &[String]) -> Vec<String> {
    keys.iter().map(|k| k.to_lowercase()).collect()
}

/// String form of a value for masking. Null masks as an empty value;
/// everything non-string keeps its JSON rendering.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_partial(value: &str, rule: &PartialRule) -> String {
    if value.is_empty() {
        return "****".to_string();
    }

    if rule.mask_email {
        return mask_email(value);
    }

    let chars: Vec<char> = value.chars().collect();

    if let Some(prefix_len) = rule.keep_prefix {
        if chars.len() <= prefix_len {
            return "****".to_string();
        }
        let prefix: String = chars[..prefix_len].iter().collect();
        return format!("{prefix}****");
    }

    if let Some(suffix_len) = rule.keep_suffix {
        if chars.len() <= suffix_len {
            return "****".to_string();
        }
        let suffix: String = chars[chars.len() - suffix_len..].iter().collect();
        return format!("****{suffix}");
    }

    full_mask(value)
}

fn full_mask(value: &str) -> String {
    let len = value.chars().count();
    if len <= 16 {
        "****".to_string()
    } else {
        format!("****[{len} chars]")
    }
}

/// Masks `example@email.com` as `e*****e@email.com`; short local parts
/// collapse to `****@domain`.
fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "****".to_string();
    };

    let local_chars: Vec<char> = local.chars().collect();
    if local_chars.len() <= 2 {
        return format!("****@{domain}");
    }

    let first = local_chars[0];
    let last = local_chars[local_chars.len() - 1];
    let stars = "*".repeat(std::cmp::min(5, local_chars.len() - 2));
    format!("{first}{stars}{last}@{domain}")
}

fn redaction_stub(entry: &Value) -> Value {
    let original_keys: Vec<String> = match entry {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    serde_json::json!({
        "error": "masking_failed",
        "original_keys": original_keys,
    })
}
