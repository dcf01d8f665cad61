use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::models::Item;

/// Quantity rules as an ordered data table, first match wins. Each handler
/// receives the match and the cleaned line and returns
/// `(quantity, product-before-cleanup)`.
struct QuantityRule {
    pattern: &'static str,
    apply: fn(&regex::Captures, &str) -> (String, String),
}

const CONTAINERS: &str = "bags?|boxes?|pcs?|pieces?|pkts?|packets?|heads?|bunches?";

static RULES: LazyLock<Vec<(Regex, &'static QuantityRule)>> = LazyLock::new(|| {
    QUANTITY_TABLE
        .iter()
        .map(|rule| {
            let re = RegexBuilder::new(rule.pattern)
                .case_insensitive(true)
                .build()
                .expect("static quantity pattern");
            (re, rule)
        })
        .collect()
});

static QUANTITY_TABLE: &[QuantityRule] = &[
    // 2 x 10kg bags red onions → qty 2, packaging kept on the product.
    QuantityRule {
        pattern: r"^(\d+)\s*[x×*]\s*\d+\s*(?:kg|box|bags?|pcs?|pieces?|pkts?|packets?|heads?|bunches?)",
        apply: |caps, line| (caps[1].to_string(), strip_leading_multiplier(line)),
    },
    // 3 bags potatoes → qty 3, container phrase stripped.
    QuantityRule {
        pattern: r"^(\d+)\s+(?:bags?|boxes?|pcs?|pieces?|pkts?|packets?|heads?|bunches?)\b",
        apply: |caps, line| (caps[1].to_string(), strip_leading_container(line)),
    },
    // 3 x veg box → qty 3.
    QuantityRule {
        pattern: r"^(\d+)\s*[x×*]",
        apply: |caps, line| (caps[1].to_string(), strip_leading_multiplier(line)),
    },
    // Baby spinach x12 → qty 12.
    QuantityRule {
        pattern: r"\s+[x×*](\d+)\s*$",
        apply: |caps, line| (caps[1].to_string(), strip_trailing_multiplier(line)),
    },
    // 5kg tomatoes → the number is a unit weight, not a count.
    QuantityRule {
        pattern: r"^\d+\s*(?:kg|g|ml|l)\s*\w",
        apply: |_, line| ("1".to_string(), line.to_string()),
    },
    // 5 tomatoes → plain leading count.
    QuantityRule {
        pattern: r"^(\d+)\s+\S",
        apply: |caps, line| (caps[1].to_string(), strip_leading_number(line)),
    },
];

static LEADING_MULTIPLIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*[x×*]\s*").unwrap());
static LEADING_CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\d+\s+(?:{CONTAINERS})\s*")).unwrap()
});
static TRAILING_MULTIPLIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[x×*]\d+\s*$").unwrap());
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s+").unwrap());
static PACKAGED_CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+\s*(?:kg|g|ml|l))\s+(?:bags?|boxes?)\s*").unwrap()
});
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn strip_leading_multiplier(line: &str) -> String {
    LEADING_MULTIPLIER_RE.replace(line, "").to_string()
}

fn strip_leading_container(line: &str) -> String {
    LEADING_CONTAINER_RE.replace(line, "").to_string()
}

fn strip_trailing_multiplier(line: &str) -> String {
    TRAILING_MULTIPLIER_RE.replace(line, "").to_string()
}

fn strip_leading_number(line: &str) -> String {
    LEADING_NUMBER_RE.replace(line, "").to_string()
}

/// Decompose one item line into `(quantity, product)`. Pure; packaging
/// descriptors stay on the product, and a line that is nothing but quantity
/// tokens still surfaces verbatim rather than as an empty product.
pub fn parse_line(line: &str) -> Item {
    let cleaned = line.trim();

    let (quantity, product) = RULES
        .iter()
        .find_map(|(re, rule)| re.captures(cleaned).map(|caps| (rule.apply)(&caps, cleaned)))
        .unwrap_or_else(|| ("1".to_string(), cleaned.to_string()));

    let product = tidy_product(&product);
    let product = if product.is_empty() {
        tidy_product(cleaned)
    } else {
        product
    };

    Item {
        quantity,
        product,
        raw: line.to_string(),
    }
}

/// Collapse a container word that trails a packaging size
/// ("10kg bags onions" → "10kg onions") and normalize whitespace.
fn tidy_product(product: &str) -> String {
    let collapsed = PACKAGED_CONTAINER_RE.replace_all(product, "$1 ");
    WHITESPACE_RE.replace_all(&collapsed, " ").trim().to_string()
}
