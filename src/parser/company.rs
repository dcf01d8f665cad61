use crate::config::AliasEntry;

/// Resolve free text to a canonical company name. Case-insensitive; an
/// exact alias hit wins over a bidirectional substring hit, and within each
/// tier the first table row wins. Table order is a documented contract.
pub fn resolve<'a>(aliases: &'a [AliasEntry], text: &str) -> Option<&'a str> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    aliases
        .iter()
        .find(|e| e.alias == needle)
        .or_else(|| {
            aliases
                .iter()
                .find(|e| needle.contains(&e.alias) || e.alias.contains(&needle))
        })
        .map(|e| e.canonical.as_str())
}
