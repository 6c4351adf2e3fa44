// Deterministic filename/title normalization for fuzzy matching.
//
// Rules, applied in order:
// 1. drop the file extension
// 2. drop a trailing disc/part suffix ("(Disc 2)", "CD1", "Side B", ...)
// 3. remove every parenthesized `(...)` and bracketed `[...]` tag group
//    (region tags, dump flags, revision markers)
// 4. lowercase, map remaining non-alphanumerics to spaces
// 5. collapse whitespace runs, trim
//
// Precision here directly controls how often items fall into needs_review
// versus auto-matching, so the rules are fixed and tested rather than
// heuristic.

use regex::Regex;
use std::sync::OnceLock;

fn tag_group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").unwrap())
}

fn disc_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Game (Disc 1)", "Game - CD 2", "Game Disk1", "Game Side A"
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)[\s._-]*[(\[]?\s*(disc|disk|cd|side|part)[\s._-]*([0-9]+|[a-d])\s*[)\]]?\s*$",
        )
        .unwrap()
    })
}

/// Strip the extension from a file name (no directory components).
pub fn stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains(' ') => stem,
        _ => file_name,
    }
}

/// The recognized disc/part suffix of a file stem, if any, as
/// `(base_name, ordinal)`. Letter ordinals map a=1 .. d=4.
pub fn split_disc_suffix(stem: &str) -> Option<(&str, u32)> {
    let caps = disc_suffix_re().captures(stem)?;
    let whole = caps.get(0)?;
    let ordinal = caps.get(2)?.as_str();
    let number = match ordinal.to_ascii_lowercase().as_str() {
        "a" => 1,
        "b" => 2,
        "c" => 3,
        "d" => 4,
        digits => digits.parse().ok()?,
    };
    let base = stem[..whole.start()].trim_end();
    if base.is_empty() {
        return None;
    }
    Some((base, number))
}

/// Normalize a file name or catalog title for fuzzy comparison.
pub fn normalize_title(file_name: &str) -> String {
    let stem = stem(file_name);
    let without_disc = split_disc_suffix(stem)
        .map(|(base, _)| base)
        .unwrap_or(stem);
    let without_tags = tag_group_re().replace_all(without_disc, " ");

    without_tags
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the two normalized forms match exactly.
pub fn exact_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_title(a), normalize_title(b));
    !a.is_empty() && a == b
}

/// True when one normalized form contains the other. Weaker than
/// `exact_match`; candidates found only by containment rank below equality.
pub fn contains_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_title(a), normalize_title(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_region_and_dump_tags() {
        assert_eq!(
            normalize_title("Chrono Trigger (USA) [!].sfc"),
            "chrono trigger"
        );
        assert_eq!(
            normalize_title("Final Fantasy III (USA) (Rev 1).smc"),
            "final fantasy iii"
        );
    }

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize_title("Mega_Man--X3.sfc"), "mega man x3");
        assert_eq!(normalize_title("  Sonic   CD  .iso"), "sonic cd");
    }

    #[test]
    fn disc_suffix_is_dropped_before_tag_groups() {
        assert_eq!(normalize_title("Game (USA) (Disc 1).bin"), "game");
        assert_eq!(normalize_title("Game (Disc 2).bin"), "game");
    }

    #[test]
    fn split_disc_suffix_parses_numbers_and_letters() {
        assert_eq!(split_disc_suffix("Game (Disc 1)"), Some(("Game", 1)));
        assert_eq!(split_disc_suffix("Game - CD 2"), Some(("Game", 2)));
        assert_eq!(split_disc_suffix("Game Disk3"), Some(("Game", 3)));
        assert_eq!(split_disc_suffix("Game Side B"), Some(("Game", 2)));
        assert_eq!(split_disc_suffix("Game"), None);
        // A bare suffix with no base name is not a multi-part item
        assert_eq!(split_disc_suffix("Disc 1"), None);
    }

    #[test]
    fn normalization_is_deterministic() {
        let name = "Legend of Zelda, The - A Link to the Past (Europe) [h1].sfc";
        assert_eq!(normalize_title(name), normalize_title(name));
        assert_eq!(
            normalize_title(name),
            "legend of zelda the a link to the past"
        );
    }

    #[test]
    fn matching_semantics() {
        assert!(exact_match("Chrono Trigger (USA).sfc", "Chrono Trigger"));
        assert!(contains_match("Chrono Trigger (USA).sfc", "Chrono"));
        assert!(!exact_match("Chrono Trigger", "Chrono Cross"));
        assert!(!contains_match("", "Chrono"));
    }
}
