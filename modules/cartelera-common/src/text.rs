//! Text normalization shared by the parser and the deduplicator.

use regex::Regex;
use std::sync::OnceLock;

/// Lowercase, strip punctuation, squeeze whitespace. The canonical form used
/// for title and venue comparison.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    squeeze_whitespace(&stripped)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn squeeze_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold Spanish/Catalan accented characters to their ASCII base.
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'Ñ' => 'N',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

fn comarca_suffixes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Aggregator feeds append comarca/metro suffixes to city names:
        // "Valladolid y Campiña del Pisuerga", "León y Comarca".
        Regex::new(
            r"(?i)\s+(y\s+comarca.*|y\s+campiña.*|y\s+alfoz.*|y\s+área\s+metropolitana.*|y\s+entorno.*|metropolitano.*)$",
        )
        .expect("invalid comarca regex")
    })
}

/// Normalize a city name for cross-source comparison: lowercase, fold
/// accents, drop comarca/metro suffixes, squeeze whitespace.
pub fn normalize_city(city: &str) -> String {
    let lowered = fold_accents(city).to_lowercase();
    let trimmed = comarca_suffixes().replace(&lowered, "");
    squeeze_whitespace(&trimmed)
}

/// Similarity ratio between two titles in [0, 1], computed on normalized,
/// accent-folded text.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let na = normalize(&fold_accents(a));
    let nb = normalize(&fold_accents(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&na, &nb)
}

/// True when one title is wholly contained in the other after normalization.
/// Aggregators routinely extend a title with the city ("Festa do Marisco" vs
/// "Festa do Marisco de Vigo"); an edit ratio under-scores those pairs. The
/// minimum length keeps trivial fragments from matching everything.
pub fn title_contains(a: &str, b: &str) -> bool {
    const MIN_CONTAINED_CHARS: usize = 12;
    let na = normalize(&fold_accents(a));
    let nb = normalize(&fold_accents(b));
    let (short, long) = if na.len() <= nb.len() { (&na, &nb) } else { (&nb, &na) };
    short.chars().count() >= MIN_CONTAINED_CHARS && long.contains(short.as_str())
}

/// Unescape the HTML entities that show up in feed and API text fields.
pub fn unescape_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let rest = &text[i..];
        // Entities are short; look for the terminator within a few chars.
        let Some(end) = rest
            .char_indices()
            .take(12)
            .find(|&(_, ch)| ch == ';')
            .map(|(j, _)| j)
        else {
            out.push(c);
            continue;
        };
        let entity = &rest[1..end];
        let replacement = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some(' '),
            "ntilde" => Some('ñ'),
            "aacute" => Some('á'),
            "eacute" => Some('é'),
            "iacute" => Some('í'),
            "oacute" => Some('ó'),
            "uacute" => Some('ú'),
            _ => entity
                .strip_prefix("#x")
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match replacement {
            Some(r) => {
                out.push(r);
                // Skip the entity body and the semicolon.
                for _ in 0..end {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }

    out
}

/// Deterministic fingerprint for synthetic external ids (FNV-1a).
/// Stable across process restarts, unlike the std hasher.
pub fn fingerprint(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in content.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("¡Festa do Marisco!"), "festa do marisco");
        assert_eq!(normalize("  Jazz   en  vivo "), "jazz en vivo");
    }

    #[test]
    fn fold_accents_covers_spanish() {
        assert_eq!(fold_accents("León"), "Leon");
        assert_eq!(fold_accents("A Coruña"), "A Coruna");
        assert_eq!(fold_accents("càtedra"), "catedra");
    }

    #[test]
    fn normalize_city_strips_comarca() {
        assert_eq!(
            normalize_city("Valladolid y Campiña del Pisuerga"),
            "valladolid"
        );
        assert_eq!(normalize_city("León y Comarca"), "leon");
        assert_eq!(normalize_city("Bilbao y Área Metropolitana"), "bilbao");
        assert_eq!(normalize_city("Vigo"), "vigo");
    }

    #[test]
    fn similar_titles_score_high() {
        let sim = title_similarity("Festa do Marisco", "Festa do Marisco de Vigo");
        assert!(sim > 0.6, "got {sim}");
        let exact = title_similarity("Concierto de Jazz", "concierto de jazz!");
        assert!(exact > 0.99, "got {exact}");
    }

    #[test]
    fn dissimilar_titles_score_low() {
        let sim = title_similarity("Concierto de Jazz", "Taller de cerámica");
        assert!(sim < 0.5, "got {sim}");
    }

    #[test]
    fn containment_catches_city_suffixed_titles() {
        assert!(title_contains(
            "Festa do Marisco",
            "Festa do Marisco de Vigo"
        ));
        assert!(title_contains(
            "FESTA DO MARISCO",
            "festa do marisco de vigo"
        ));
        // Short fragments never count as containment.
        assert!(!title_contains("Feria", "Feria de Abril de Sevilla"));
        assert!(!title_contains("Concierto de Jazz", "Taller de cerámica"));
    }

    #[test]
    fn empty_titles_score_zero() {
        assert_eq!(title_similarity("", "algo"), 0.0);
        assert_eq!(title_similarity("!!!", "algo"), 0.0);
    }

    #[test]
    fn unescape_common_entities() {
        assert_eq!(
            unescape_entities("Mar&iacute;a &amp; Jos&eacute;"),
            "María & José"
        );
        assert_eq!(unescape_entities("a &lt;b&gt; c"), "a <b> c");
        assert_eq!(unescape_entities("Espa&ntilde;a"), "España");
        assert_eq!(unescape_entities("&#233;"), "é");
        assert_eq!(unescape_entities("&#x41;"), "A");
    }

    #[test]
    fn unescape_leaves_unknown_alone() {
        assert_eq!(unescape_entities("R&D; dept"), "R&D; dept");
        assert_eq!(unescape_entities("fish & chips"), "fish & chips");
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("hola"), fingerprint("hola"));
        assert_ne!(fingerprint("hola"), fingerprint("hola "));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("añoranza", 3), "año");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
