//! Payload Decoder - Recursive de-obfuscation before keyword matching
//!
//! Attackers stack encodings (`%253Cscript` → `%3Cscript` → `<script`).
//! One pass applies every stage in a fixed order; passes repeat until a
//! fixed point or `max_depth`. No stage ever fails: on bad input a stage
//! returns its input unchanged.

use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// ============================================================================
// PATTERNS
// ============================================================================

static RE_HTML_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});?").unwrap());
static RE_UNICODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\\u|%u)([0-9a-fA-F]{4})").unwrap());
static RE_HEX_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\x([0-9a-fA-F]{2})").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Minimum length before a string is considered base64
const BASE64_MIN_LEN: usize = 8;

/// Share of printable bytes required to accept a base64 decode
const PRINTABLE_RATIO: f32 = 0.8;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Decode to a fixed point, at most `max_depth` passes
pub fn decode(input: &str, max_depth: usize) -> String {
    let mut current = input.to_string();

    for _ in 0..max_depth {
        let decoded = decode_pass(&current);
        if decoded == current {
            break;
        }
        current = decoded;
    }

    current
}

/// One full pass over every stage
pub fn decode_pass(input: &str) -> String {
    let s = url_decode(input);
    let s = html_decode(&s);
    let s = unicode_decode(&s);
    let s = hex_decode(&s);
    let s = base64_decode(&s);
    normalize(&s)
}

// ============================================================================
// STAGES
// ============================================================================

/// `%XX` percent-decoding; invalid UTF-8 becomes U+FFFD
pub fn url_decode(s: &str) -> String {
    let bytes = urlencoding::decode_binary(s.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Numeric and common named HTML entities
pub fn html_decode(s: &str) -> String {
    RE_HTML_ENTITY
        .replace_all(s, |caps: &Captures| {
            let whole = &caps[0];
            let body = &caps[1];

            if let Some(num) = body.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                return code
                    .and_then(char::from_u32)
                    .filter(|c| *c != '\0')
                    .unwrap_or('\u{FFFD}')
                    .to_string();
            }

            // Named entities need the terminating ';'
            if !whole.ends_with(';') {
                return whole.to_string();
            }
            match named_entity(body) {
                Some(c) => c.to_string(),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// `\uXXXX` and `%uXXXX`
pub fn unicode_decode(s: &str) -> String {
    RE_UNICODE
        .replace_all(s, |caps: &Captures| {
            u32::from_str_radix(&caps[2], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// `\xHH` escapes, then a whole-string hex dump
pub fn hex_decode(s: &str) -> String {
    let s = RE_HEX_ESCAPE
        .replace_all(s, |caps: &Captures| {
            u8::from_str_radix(&caps[1], 16)
                .map(|b| char::from(b).to_string())
                .unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned();

    if !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(&s) {
            return lossy_ignore(&bytes);
        }
    }
    s
}

/// Whole-string base64, only when it looks like real encoded text
pub fn base64_decode(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() < BASE64_MIN_LEN || trimmed.len() % 4 != 0 {
        return s.to_string();
    }

    match base64::engine::general_purpose::STANDARD.decode(trimmed) {
        Ok(bytes) if is_mostly_printable(&bytes) => lossy_ignore(&bytes),
        _ => s.to_string(),
    }
}

/// Lower-case, CR/LF → space, collapse whitespace runs
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase().replace(['\n', '\r'], " ");
    RE_WHITESPACE.replace_all(&lowered, " ").into_owned()
}

// ============================================================================
// HELPERS
// ============================================================================

fn is_mostly_printable(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let printable = data
        .iter()
        .filter(|&&b| matches!(b, 9 | 10 | 13) || (32..=126).contains(&b))
        .count();
    printable as f32 / data.len() as f32 > PRINTABLE_RATIO
}

/// UTF-8 decode dropping invalid sequences
fn lossy_ignore(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\u{FFFD}', "")
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" | "AMP" => '&',
        "lt" | "LT" => '<',
        "gt" | "GT" => '>',
        "quot" | "QUOT" => '"',
        "apos" => '\'',
        "nbsp" => '\u{A0}',
        "sol" => '/',
        "bsol" => '\\',
        "lpar" => '(',
        "rpar" => ')',
        "lsqb" | "lbrack" => '[',
        "rsqb" | "rbrack" => ']',
        "lcub" | "lbrace" => '{',
        "rcub" | "rbrace" => '}',
        "semi" => ';',
        "colon" => ':',
        "comma" => ',',
        "period" => '.',
        "equals" => '=',
        "percnt" => '%',
        "num" => '#',
        "excl" => '!',
        "quest" => '?',
        "dollar" => '$',
        "ast" | "midast" => '*',
        "plus" => '+',
        "grave" => '`',
        "Hat" => '^',
        "verbar" | "vert" => '|',
        "tilde" => '~',
        "commat" => '@',
        "Tab" => '\t',
        "NewLine" => '\n',
        _ => return None,
    };
    Some(c)
}

// ============================================================================
// TESTS
// ============================================================================
