//! Placeholder scanning and identifier normalization.

/// A `${...}` occurrence inside an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placeholder<'a> {
  /// Byte offset of `$`.
  pub start: usize,
  /// Byte offset just past the closing `}`.
  pub end: usize,
  /// Text between the braces, trimmed.
  pub inner: &'a str,
}

/// Find top-level `${...}` placeholders. Nested braces inside a placeholder
/// are kept in its body; an unterminated placeholder is ignored.
pub(crate) fn find_placeholders(expression: &str) -> Vec<Placeholder<'_>> {
  let bytes = expression.as_bytes();
  let mut found = Vec::new();
  let mut i = 0;

  while i + 1 < bytes.len() {
    if bytes[i] == b'$' && bytes[i + 1] == b'{' {
      let mut depth = 1;
      let mut j = i + 2;
      while j < bytes.len() && depth > 0 {
        match bytes[j] {
          b'{' => depth += 1,
          b'}' => depth -= 1,
          _ => {}
        }
        j += 1;
      }
      if depth != 0 {
        break;
      }
      found.push(Placeholder {
        start: i,
        end: j,
        inner: expression[i + 2..j - 1].trim(),
      });
      i = j;
    } else {
      i += 1;
    }
  }

  found
}

/// Normalize a display name into an identifier usable in expressions.
///
/// Every character in ``-+*/\ &$"'.|()`` becomes `__`.
pub fn normalize_name(name: &str) -> String {
  let mut normalized = String::with_capacity(name.len());
  for c in name.chars() {
    match c {
      '-' | '+' | '*' | '/' | '\\' | ' ' | '&' | '$' | '"' | '\'' | '.' | '|' | '(' | ')' => {
        normalized.push_str("__")
      }
      _ => normalized.push(c),
    }
  }
  normalized
}

/// Split `a.b[0].c` into the top-level name and the remainder (`.b[0].c`).
pub(crate) fn split_top_level(expression: &str) -> (&str, &str) {
  match expression.find(|c: char| c == '.' || c == '[') {
    Some(idx) => expression.split_at(idx),
    None => (expression, ""),
  }
}
