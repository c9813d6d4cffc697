//! Text helpers shared by retrieval, intent classification and validation
//!
//! Everything here works on French and English finance text: accent
//! folding, tokenisation, token estimation and locale-tolerant number
//! parsing (`1 234,56`, `1,234.56`, `1.234,56`).

/// Estimated token count: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Lowercase and strip the diacritics found in French and English text
pub fn fold_accents(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' | 'ã' | 'å' => folded.push('a'),
            'ç' => folded.push('c'),
            'é' | 'è' | 'ê' | 'ë' => folded.push('e'),
            'î' | 'ï' | 'í' | 'ì' => folded.push('i'),
            'ô' | 'ö' | 'ó' | 'ò' | 'õ' => folded.push('o'),
            'ù' | 'û' | 'ü' | 'ú' => folded.push('u'),
            'ÿ' | 'ý' => folded.push('y'),
            'ñ' => folded.push('n'),
            'œ' => folded.push_str("oe"),
            'æ' => folded.push_str("ae"),
            '’' | '‘' => folded.push('\''),
            _ => folded.push(c),
        }
    }
    folded
}

/// Accent-folded alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    fold_accents(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Folded text where every non-alphanumeric run is a single space, padded
/// with a space on both sides so whole-word lookups can use `" word "`
pub fn word_haystack(text: &str) -> String {
    let tokens = tokenize(text);
    let mut haystack = String::with_capacity(text.len() + 2);
    haystack.push(' ');
    for token in tokens {
        haystack.push_str(&token);
        haystack.push(' ');
    }
    haystack
}

/// Parse a number written with French or English separators.
///
/// When both `,` and `.` appear, the last one is the decimal separator. A
/// lone separator followed by exactly three digits is a thousands separator.
pub fn parse_number(raw: &str) -> Option<f64> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '\''))
        .collect();
    if compact.is_empty() {
        return None;
    }

    let last_comma = compact.rfind(',');
    let last_dot = compact.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                compact.replace('.', "").replace(',', ".")
            } else {
                compact.replace(',', "")
            }
        }
        (Some(_), None) => resolve_single_separator(&compact, ','),
        (None, Some(_)) => resolve_single_separator(&compact, '.'),
        (None, None) => compact,
    };

    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn resolve_single_separator(compact: &str, separator: char) -> String {
    let occurrences = compact.matches(separator).count();
    let decimals = compact
        .rsplit(separator)
        .next()
        .map(str::len)
        .unwrap_or_default();

    if occurrences > 1 || decimals == 3 {
        compact.replace(separator, "")
    } else {
        compact.replace(separator, ".")
    }
}

/// Truncate to at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("Échéance dépassée"), "echeance depassee");
        assert_eq!(fold_accents("Trésorerie"), "tresorerie");
        assert_eq!(fold_accents("cœur"), "coeur");
    }

    #[test]
    fn test_tokenize_and_haystack() {
        assert_eq!(tokenize("Factures payées, l'an dernier!"), vec!["factures", "payees", "l", "an", "dernier"]);
        assert_eq!(word_haystack("Ce mois-ci"), " ce mois ci ");
    }

    #[test]
    fn test_parse_number_locales() {
        assert_eq!(parse_number("1 234,56"), Some(1234.56));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1234.5"), Some(1234.5));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("12 000"), Some(12000.0));
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
