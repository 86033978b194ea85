// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The catalog of models known to the coordinator, parsed from plain
//! identifier strings via a data-driven family table rather than
//! hand-written per-model logic.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A parsed model identifier with its estimated parameter count, an ordinal
/// complexity rank, and whether the family is vision-capable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    /// The identifier as registered, e.g. `"llama3.1:8b"`.
    pub identifier: String,
    /// Model family, e.g. `"llama3.1"`.
    pub family: String,
    /// Estimated parameter count in billions.
    pub parameters_b: f64,
    /// Ordinal complexity rank, higher is more capable.
    pub complexity_rank: u8,
    /// Estimated on-disk/VRAM footprint in GB (`parameters_b * 2`, a rough
    /// fp16-weights estimate).
    pub size_gb: f64,
    /// Whether the family accepts image inputs.
    pub vision: bool,
}

impl ModelDescriptor {
    /// Parse a model identifier against the known family table, falling
    /// back to a bare `{N}b` token match. Returns `None` if nothing
    /// matches — callers should log and ignore rather than reject the
    /// caller outright.
    pub fn parse(identifier: &str) -> Option<Self> {
        let lower = identifier.to_lowercase();
        for entry in family_table() {
            if let Some(caps) = entry.pattern.captures(&lower) {
                let parameters_b = (entry.extract)(&caps);
                return Some(Self::from_parts(identifier, entry.family, parameters_b, entry.vision));
            }
        }
        fallback_pattern()
            .captures(&lower)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|parameters_b| Self::from_parts(identifier, &lower, parameters_b, looks_vision_capable(&lower)))
    }

    fn from_parts(identifier: &str, family: &str, parameters_b: f64, vision: bool) -> Self {
        Self {
            identifier: identifier.to_string(),
            family: family.to_string(),
            parameters_b,
            complexity_rank: complexity_rank(parameters_b),
            size_gb: parameters_b * 2.0,
            vision,
        }
    }
}

/// Ordinal complexity rank by parameter count, a fixed step function
/// (thresholds given in billions of parameters).
fn complexity_rank(parameters_b: f64) -> u8 {
    if parameters_b >= 70.0 {
        10
    } else if parameters_b >= 30.0 {
        9
    } else if parameters_b >= 13.0 {
        8
    } else if parameters_b >= 8.0 {
        7
    } else if parameters_b >= 7.0 {
        6
    } else if parameters_b >= 3.0 {
        5
    } else if parameters_b >= 1.0 {
        4
    } else if parameters_b >= 0.5 {
        3
    } else if parameters_b >= 0.1 {
        2
    } else {
        1
    }
}

struct FamilyEntry {
    family: &'static str,
    pattern: Regex,
    vision: bool,
    extract: fn(&regex::Captures) -> f64,
}

fn param_count(caps: &regex::Captures) -> f64 {
    caps.get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn mixture_count(caps: &regex::Captures) -> f64 {
    let a: f64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
    let b: f64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
    a * b
}

fn family_table() -> &'static Vec<FamilyEntry> {
    static TABLE: OnceLock<Vec<FamilyEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            FamilyEntry { family: "llama3.2", pattern: Regex::new(r"llama3\.2:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "llama3.1", pattern: Regex::new(r"llama3\.1:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "llama3", pattern: Regex::new(r"llama3:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "llama2", pattern: Regex::new(r"llama2:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "mistral", pattern: Regex::new(r"mistral:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "mixtral", pattern: Regex::new(r"mixtral:(\d+)x(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: mixture_count },
            FamilyEntry { family: "codellama", pattern: Regex::new(r"codellama:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "gemma2", pattern: Regex::new(r"gemma2:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "gemma", pattern: Regex::new(r"gemma:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "phi3", pattern: Regex::new(r"phi3:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "qwen2.5", pattern: Regex::new(r"qwen2\.5:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "qwen2", pattern: Regex::new(r"qwen2:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "deepseek-r1", pattern: Regex::new(r"deepseek-r1:(\d+(?:\.\d+)?)b").unwrap(), vision: false, extract: param_count },
            FamilyEntry { family: "llava", pattern: Regex::new(r"llava:(\d+(?:\.\d+)?)b").unwrap(), vision: true, extract: param_count },
        ]
    })
}

/// Heuristic vision-capability detection for identifiers that don't match
/// any entry in the family table: a `vision`/`llava`/`vl` token or `-v`
/// family suffix anywhere in the (already-lowercased) identifier.
fn looks_vision_capable(lower: &str) -> bool {
    lower.contains("vision") || lower.contains("llava") || lower.contains("-vl") || lower.contains(":vl") || lower.ends_with("-v")
}

fn fallback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)b").unwrap())
}

/// The coordinator's view of every known model, kept sorted ascending by
/// complexity rank (ties broken by identifier) so the assignment engine can
/// walk it in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build a catalog from a list of identifiers, silently dropping any
    /// that don't parse against the family table.
    pub fn from_identifiers<I: IntoIterator<Item = String>>(identifiers: I) -> Self {
        let mut catalog = Self::default();
        for id in identifiers {
            catalog.add(&id);
        }
        catalog
    }

    /// Insert a model by identifier, ignoring it (with a log) if it does
    /// not parse. Re-sorts the catalog afterward.
    pub fn add(&mut self, identifier: &str) -> bool {
        match ModelDescriptor::parse(identifier) {
            Some(descriptor) => {
                self.models.push(descriptor);
                self.resort();
                true
            }
            None => {
                tracing::warn!(identifier, "unrecognized model identifier, ignoring");
                false
            }
        }
    }

    /// Insert a caller-supplied descriptor directly (the "custom model"
    /// entry point), re-sorting afterward.
    pub fn add_custom_model(&mut self, descriptor: ModelDescriptor) {
        self.models.push(descriptor);
        self.resort();
    }

    fn resort(&mut self) {
        self.models
            .sort_by(|a, b| a.complexity_rank.cmp(&b.complexity_rank).then_with(|| a.identifier.cmp(&b.identifier)));
    }

    /// All known models, ascending by complexity rank.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Number of known models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog has no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look up a model by identifier.
    pub fn get(&self, identifier: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.identifier == identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_llama_family() {
        let m = ModelDescriptor::parse("llama3.1:8b").unwrap();
        assert_eq!(m.family, "llama3.1");
        assert_eq!(m.parameters_b, 8.0);
        assert_eq!(m.complexity_rank, 7);
        assert!(!m.vision);
    }

    #[test]
    fn parses_mixture_of_experts() {
        let m = ModelDescriptor::parse("mixtral:8x7b").unwrap();
        assert_eq!(m.parameters_b, 56.0);
        assert_eq!(m.complexity_rank, 9);
    }

    #[test]
    fn parses_vision_family() {
        let m = ModelDescriptor::parse("llava:13b").unwrap();
        assert!(m.vision);
    }

    #[test]
    fn falls_back_to_bare_b_token() {
        let m = ModelDescriptor::parse("some-custom-model-70b").unwrap();
        assert_eq!(m.parameters_b, 70.0);
        assert_eq!(m.complexity_rank, 10);
    }

    #[test]
    fn complexity_rank_follows_documented_step_function() {
        assert_eq!(complexity_rank(70.0), 10);
        assert_eq!(complexity_rank(30.0), 9);
        assert_eq!(complexity_rank(13.0), 8);
        assert_eq!(complexity_rank(8.0), 7);
        assert_eq!(complexity_rank(7.0), 6);
        assert_eq!(complexity_rank(3.0), 5);
        assert_eq!(complexity_rank(1.0), 4);
        assert_eq!(complexity_rank(0.5), 3);
        assert_eq!(complexity_rank(0.1), 2);
        assert_eq!(complexity_rank(0.01), 1);
    }

    #[test]
    fn fallback_vision_heuristic_catches_unlisted_vl_model() {
        let m = ModelDescriptor::parse("qwen-vl-72b").unwrap();
        assert!(m.vision);
    }

    #[test]
    fn unparseable_identifier_returns_none() {
        assert!(ModelDescriptor::parse("no-param-count-here").is_none());
    }

    #[test]
    fn catalog_stays_sorted_after_mutation() {
        let mut catalog = ModelCatalog::from_identifiers(vec!["llama3.1:70b".to_string(), "llama3.1:8b".to_string()]);
        assert_eq!(catalog.models()[0].identifier, "llama3.1:8b");
        catalog.add("llama3.2:1b");
        assert_eq!(catalog.models()[0].identifier, "llama3.2:1b");
    }

    #[test]
    fn unrecognized_identifier_is_ignored_not_rejected() {
        let mut catalog = ModelCatalog::default();
        assert!(!catalog.add("garbage"));
        assert!(catalog.is_empty());
    }
}
