//! Small utility helpers used across modules.

use std::collections::HashSet;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Lowercased word set of a message, with surrounding punctuation trimmed
/// ("table," and "Table" both become "table"). Inner apostrophes and hyphens stay.
pub fn word_set(text: &str) -> HashSet<String> {
  text
    .split_whitespace()
    .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
    .filter(|w| !w.is_empty())
    .collect()
}

/// Lowercase a phrase and drop trailing punctuation and ellipses so that
/// "I'll have the..." matches "i'll have the salmon".
pub fn normalize_phrase(phrase: &str) -> String {
  phrase
    .trim()
    .trim_end_matches(|c: char| matches!(c, '.' | '?' | '!' | '…') || c.is_whitespace())
    .to_lowercase()
}

/// "main_interaction" -> "Main Interaction"
pub fn title_case(id: &str) -> String {
  id.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
    .filter(|p| !p.is_empty())
    .map(|p| {
      let mut chars = p.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join(" ")
}

/// First 8 hex chars of a fresh v4 uuid, for human-scannable generated ids.
pub fn short_uuid() -> String {
  uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
