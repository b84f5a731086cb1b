use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::domain::column::{DecimalSeparator, DigitScript, NumericConvention};

const SCRIPTS: [(DigitScript, char); 4] = [
    (DigitScript::ArabicIndic, '\u{0660}'),
    (DigitScript::ExtendedArabicIndic, '\u{06F0}'),
    (DigitScript::Devanagari, '\u{0966}'),
    (DigitScript::FullWidth, '\u{FF10}'),
];

fn script_of(ch: char) -> Option<(DigitScript, u32)> {
    if ch.is_ascii_digit() {
        return Some((DigitScript::Ascii, ch as u32 - '0' as u32));
    }
    SCRIPTS.iter().find_map(|(script, zero)| {
        let offset = (ch as u32).checked_sub(*zero as u32)?;
        (offset < 10).then_some((*script, offset))
    })
}

/// Maps every supported digit script (and the Arabic and full-width
/// separators) to ASCII.
pub fn to_ascii_digits(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{066B}' | '\u{FF0E}' => '.',
            '\u{066C}' | '\u{FF0C}' => ',',
            other => match script_of(other) {
                Some((_, value)) => char::from_digit(value, 10).unwrap_or(other),
                None => other,
            },
        })
        .collect()
}

/// The non-ASCII digit script used in `text`, if any.
pub fn digit_script_of(text: &str) -> Option<DigitScript> {
    text.chars()
        .filter_map(script_of)
        .map(|(script, _)| script)
        .find(|script| *script != DigitScript::Ascii)
}

fn strip_decorations(text: &str) -> String {
    text.chars()
        .filter(|ch| {
            !ch.is_whitespace()
                && !matches!(ch, '\u{00A0}' | '\u{202F}' | '\'' | '’' | '€' | '$' | '£' | '¥' | '₹')
        })
        .collect()
}

/// Which separator a single sample votes for, if it is unambiguous.
fn separator_vote(sample: &str) -> Option<DecimalSeparator> {
    let cleaned = strip_decorations(&to_ascii_digits(sample));
    let dots = cleaned.matches('.').count();
    let commas = cleaned.matches(',').count();
    match (dots, commas) {
        (0, 0) => None,
        (_, 0) if dots > 1 => Some(DecimalSeparator::Comma),
        (0, _) if commas > 1 => Some(DecimalSeparator::Dot),
        (1, 0) => single_separator_vote(&cleaned, '.', DecimalSeparator::Dot),
        (0, 1) => single_separator_vote(&cleaned, ',', DecimalSeparator::Comma),
        _ => {
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            if last_dot > last_comma {
                Some(DecimalSeparator::Dot)
            } else {
                Some(DecimalSeparator::Comma)
            }
        }
    }
}

/// "1,234" could be a thousand or one-point-two; three trailing digits abstain.
fn single_separator_vote(
    cleaned: &str,
    separator: char,
    vote: DecimalSeparator,
) -> Option<DecimalSeparator> {
    let trailing = cleaned
        .rsplit(separator)
        .next()
        .map(|tail| tail.chars().take_while(char::is_ascii_digit).count())
        .unwrap_or(0);
    (trailing != 3).then_some(vote)
}

/// Dominant numeric convention over a column's text samples, and whether the
/// samples disagreed.
pub fn detect_convention<'a>(samples: impl IntoIterator<Item = &'a str>) -> (NumericConvention, bool) {
    let mut dot = 0usize;
    let mut comma = 0usize;
    let mut scripts: Vec<(DigitScript, usize)> = Vec::new();

    for sample in samples {
        if let Some(script) = digit_script_of(sample) {
            match scripts.iter_mut().find(|(known, _)| *known == script) {
                Some((_, count)) => *count += 1,
                None => scripts.push((script, 1)),
            }
        }
        match separator_vote(sample) {
            Some(DecimalSeparator::Dot) => dot += 1,
            Some(DecimalSeparator::Comma) => comma += 1,
            None => {}
        }
    }

    let digit_script = scripts
        .iter()
        .max_by(|left, right| left.1.cmp(&right.1).then(right.0.cmp(&left.0)))
        .map(|(script, _)| *script)
        .unwrap_or(DigitScript::Ascii);
    let decimal_separator =
        if comma > dot { DecimalSeparator::Comma } else { DecimalSeparator::Dot };

    (NumericConvention { decimal_separator, digit_script }, dot > 0 && comma > 0)
}

/// Parses a human-written number under the given convention. Accepts currency
/// symbols, grouping separators, a leading sign and accounting parentheses.
pub fn parse_decimal(text: &str, convention: NumericConvention) -> Option<Decimal> {
    let mut cleaned = strip_decorations(&to_ascii_digits(text));
    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    } else if let Some(rest) = cleaned.strip_prefix('+') {
        cleaned = rest.to_string();
    }

    let separator = convention.decimal_separator.as_char();
    let grouping = convention.decimal_separator.grouping_char();
    let mut canonical = String::with_capacity(cleaned.len());
    let mut seen_separator = false;
    for ch in cleaned.chars() {
        if ch.is_ascii_digit() {
            canonical.push(ch);
        } else if ch == separator && !seen_separator {
            seen_separator = true;
            canonical.push('.');
        } else if ch == grouping && !seen_separator {
            continue;
        } else {
            return None;
        }
    }
    if !canonical.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let value = Decimal::from_str(&canonical).ok()?;
    Some(if negative { -value } else { value })
}

/// True if the text parses as a number under either separator convention.
pub fn looks_numeric(text: &str) -> bool {
    let script = digit_script_of(text).unwrap_or(DigitScript::Ascii);
    [DecimalSeparator::Dot, DecimalSeparator::Comma].into_iter().any(|decimal_separator| {
        parse_decimal(text, NumericConvention { decimal_separator, digit_script: script })
            .is_some()
    })
}

/// Converts a spreadsheet float through its shortest decimal form, so 0.1
/// stays 0.1.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .map(|decimal| decimal.normalize())
}

/// Uppercases product codes and removes all whitespace.
pub fn normalize_identifier(text: &str) -> String {
    to_ascii_digits(text).chars().filter(|ch| !ch.is_whitespace()).flat_map(char::to_uppercase).collect()
}

/// Identifiers that look like GTIN-8/12/13/14 codes.
pub fn is_gtin_candidate(identifier: &str) -> bool {
    matches!(identifier.len(), 8 | 12 | 13 | 14) && identifier.chars().all(|ch| ch.is_ascii_digit())
}

/// GS1 mod-10 check digit validation.
pub fn gs1_checksum_valid(code: &str) -> bool {
    if !is_gtin_candidate(code) {
        return false;
    }
    let digits: Vec<u32> = code.chars().filter_map(|ch| ch.to_digit(10)).collect();
    let Some((check, body)) = digits.split_last() else {
        return false;
    };
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(index, digit)| if index % 2 == 0 { digit * 3 } else { *digit })
        .sum();
    (10 - sum % 10) % 10 == *check
}
