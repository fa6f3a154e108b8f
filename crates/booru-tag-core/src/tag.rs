use std::collections::HashSet;

/// Canonical spelling for a user-supplied tag: lowercase, underscores for spaces.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let joined = tag
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for tag in tags {
        let Some(normalized) = normalize_tag(tag.as_ref()) else {
            continue;
        };
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Splits free-form input into raw tags. Commas win over whitespace so that
/// `long hair, blue eyes` keeps multi-word tags together.
pub fn split_tag_input(input: &str) -> Vec<String> {
    if input.contains(',') {
        input
            .split(',')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    } else {
        input.split_whitespace().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_tag, normalize_tags, split_tag_input};

    #[test]
    fn normalize_lowercases_and_joins_words() {
        assert_eq!(normalize_tag("  Long Hair ").as_deref(), Some("long_hair"));
        assert_eq!(normalize_tag("blue_eyes").as_deref(), Some("blue_eyes"));
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn normalize_tags_dedups_in_order() {
        let tags = normalize_tags(["Blue_Eyes", "", "blonde_hair", "blue_eyes"]);
        assert_eq!(tags, vec!["blue_eyes", "blonde_hair"]);
    }

    #[test]
    fn split_prefers_commas() {
        assert_eq!(
            split_tag_input("long hair, blue eyes,,"),
            vec!["long hair", "blue eyes"]
        );
        assert_eq!(
            split_tag_input("blonde_hair  school_uniform"),
            vec!["blonde_hair", "school_uniform"]
        );
    }
}
