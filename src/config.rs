use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid quantity pattern `{pattern}`: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// One alias-table row. Table order is a documented resolution tie-break:
/// the first row that matches wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Consecutive zero-growth scroll attempts before declaring top of history.
    pub stability_threshold: u32,
    /// Hard ceiling on scroll attempts per cycle.
    pub max_attempts: u32,
    /// Bounded wait after each scroll command for virtualized rows to land.
    pub settle_ms: u64,
    /// Bounded wait after clicking an expand affordance.
    pub expand_wait_ms: u64,
    /// Per-operation retries for transient element failures.
    pub element_retries: u32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 12,
            max_attempts: 50,
            settle_ms: 4000,
            expand_wait_ms: 2500,
            element_retries: 2,
        }
    }
}

/// Keyword sets evaluated by the classifier and the attribution parser.
/// Matching is case-insensitive substring containment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSets {
    pub demarcation: Vec<String>,
    pub stock: Vec<String>,
    pub order: Vec<String>,
    pub instruction: Vec<String>,
    /// Greeting/closing phrases the parser treats as instruction lines.
    pub greeting: Vec<String>,
    /// Product words that mark a line as an order item without a quantity.
    pub product: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        let up = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            demarcation: up(&[
                "ORDERS STARTS HERE",
                "THURSDAY ORDERS",
                "TUESDAY ORDERS",
                "MONDAY ORDERS",
            ]),
            stock: up(&["STOCK", "AVAILABLE", "INVENTORY", "SUPPLY", "STOKE"]),
            order: up(&[
                "ORDER", "NEED", "WANT", "KG", "BOXES", "X1", "X2", "X3", "X4", "X5",
            ]),
            instruction: up(&["GOOD MORNING", "HELLO", "HI", "THANKS", "PLEASE", "NOTE"]),
            greeting: up(&[
                "GOOD MORNING",
                "MORNING",
                "HELLO",
                "HI",
                "HALLO",
                "THANKS",
                "THANK YOU",
                "PLEASE",
                "PLZ",
                "PLIZ",
                "NOTE",
                "REMEMBER",
                "SEPARATE INVOICE",
                "SEPERATE INVOICE",
                "THAT'S ALL",
                "THATS ALL",
                "TNX",
                "CHEERS",
            ]),
            product: up(&[
                "tomato", "potato", "onion", "lettuce", "spinach", "carrot", "mushroom",
                "pepper", "cucumber", "broccoli", "cauliflower", "cabbage", "rocket",
                "lemon", "orange", "banana", "apple", "avocado", "corn", "butternut",
                "marrow", "chilli", "basil", "parsley", "coriander", "rosemary",
                "strawberry", "lime", "naartjie", "ginger", "garlic", "herbs", "greens",
                "egg",
            ]),
        }
    }
}

/// Externally supplied configuration. Everything here is swappable from a
/// JSON file without a code change; defaults mirror the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chat_name: String,
    /// Days of history a cycle must cover.
    pub retention_days: i64,
    pub scroll: ScrollConfig,
    pub aliases: Vec<AliasEntry>,
    pub quantity_patterns: Vec<String>,
    pub keywords: KeywordSets,
}

impl Default for Config {
    fn default() -> Self {
        let alias = |a: &str, c: &str| AliasEntry {
            alias: a.to_string(),
            canonical: c.to_string(),
        };
        Self {
            chat_name: "ORDERS Restaurants".to_string(),
            retention_days: 7,
            scroll: ScrollConfig::default(),
            aliases: vec![
                alias("mugg and bean", "Mugg and Bean"),
                alias("mugg bean", "Mugg and Bean"),
                alias("mugg", "Mugg and Bean"),
                alias("venue", "Venue"),
                alias("debonairs", "Debonairs"),
                alias("t-junction", "T-junction"),
                alias("t junction", "T-junction"),
                alias("wimpy", "Wimpy"),
                alias("wimpy mooinooi", "Wimpy"),
                alias("shebeen", "Shebeen"),
                alias("casa bella", "Casa Bella"),
                alias("casabella", "Casa Bella"),
                alias("luma", "Luma"),
                alias("marco", "Marco"),
                alias("maltos", "Maltos"),
            ],
            quantity_patterns: [
                r"\d+\s*x\s*\d*\s*kg",
                r"\d+\s*kg",
                r"\d+\s*box",
                r"\d+\s*boxes",
                r"x\d+",
                r"\d+x",
                r"\d+\*",
                r"\d+\s*pcs",
                r"\d+\s*pieces",
                r"\d+\s*pkts",
                r"\d+\s*packets",
                r"\d+\s*heads",
                r"\d+\s*bunches",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            keywords: KeywordSets::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// A `Config` with its pattern tables compiled and its alias table
/// normalized. Built once per session; read-only afterwards.
#[derive(Debug)]
pub struct Rules {
    pub config: Config,
    quantity: Vec<Regex>,
}

impl Rules {
    pub fn compile(mut config: Config) -> Result<Self, ConfigError> {
        for entry in &mut config.aliases {
            entry.alias = entry.alias.trim().to_lowercase();
        }
        let quantity = config
            .quantity_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::BadPattern {
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, quantity })
    }

    pub fn has_quantity(&self, text: &str) -> bool {
        self.quantity.iter().any(|re| re.is_match(text))
    }

    /// Item predicate: a quantity pattern or a product keyword marks the line
    /// as an order item. Very short fragments never qualify.
    pub fn is_item_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.len() < 3 {
            return false;
        }
        if self.has_quantity(line) {
            return true;
        }
        let lower = line.to_lowercase();
        self.config
            .keywords
            .product
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }

    /// Greeting/closing predicate. Item status takes precedence on conflict,
    /// so callers check `is_item_line` first.
    pub fn is_greeting_line(&self, line: &str) -> bool {
        let upper = line.trim().to_uppercase();
        if upper.is_empty() {
            return false;
        }
        self.config
            .keywords
            .greeting
            .iter()
            .any(|kw| upper.contains(&kw.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Rules {
        Rules::compile(Config::default()).unwrap()
    }

    #[test]
    fn default_config_compiles() {
        rules();
    }

    #[test]
    fn quantity_patterns_match_common_forms() {
        let r = rules();
        for line in ["2x5kg", "10kg onions", "3 boxes", "x12", "5 pcs", "6pkts"] {
            assert!(r.has_quantity(line), "expected quantity in {line:?}");
        }
        assert!(!r.has_quantity("good morning"));
    }

    #[test]
    fn item_predicate_uses_keywords_and_patterns() {
        let r = rules();
        assert!(r.is_item_line("baby spinach"));
        assert!(r.is_item_line("3 bags potatoes"));
        assert!(!r.is_item_line("ok"));
        assert!(!r.is_item_line("see you tomorrow"));
    }

    #[test]
    fn greeting_predicate() {
        let r = rules();
        assert!(r.is_greeting_line("Good morning may I please order"));
        assert!(r.is_greeting_line("Tnx that's all"));
        assert!(!r.is_greeting_line("2x5kg tomatoes"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let mut cfg = Config::default();
        cfg.quantity_patterns.push("(unclosed".to_string());
        assert!(matches!(
            Rules::compile(cfg),
            Err(ConfigError::BadPattern { .. })
        ));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.aliases.len(), cfg.aliases.len());
        assert_eq!(back.retention_days, cfg.retention_days);
    }

    #[test]
    fn partial_config_file_uses_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"retention_days": 3}"#).unwrap();
        assert_eq!(cfg.retention_days, 3);
        assert!(!cfg.aliases.is_empty());
        assert_eq!(cfg.scroll.max_attempts, 50);
    }
}
