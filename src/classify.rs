use crate::config::Rules;
use crate::models::{Category, MediaKind};

/// Pure, stateless classification. Media kind short-circuits to its own
/// category; text falls through the keyword tiers in fixed order:
/// demarcation → stock → order/quantity → instruction → other.
pub fn classify(rules: &Rules, text: &str, media: MediaKind) -> Category {
    match media {
        MediaKind::Image => return Category::Image,
        MediaKind::Voice => return Category::Voice,
        MediaKind::Video => return Category::Video,
        MediaKind::Document | MediaKind::Sticker => return Category::Other,
        MediaKind::None => {}
    }

    let upper = text.to_uppercase();
    let contains_any = |keywords: &[String]| {
        keywords.iter().any(|kw| upper.contains(&kw.to_uppercase()))
    };

    let kw = &rules.config.keywords;
    if contains_any(&kw.demarcation) {
        return Category::Demarcation;
    }
    if contains_any(&kw.stock) {
        return Category::Stock;
    }
    if contains_any(&kw.order) || rules.has_quantity(&upper) {
        return Category::Order;
    }
    if contains_any(&kw.instruction) {
        return Category::Instruction;
    }
    Category::Other
}
