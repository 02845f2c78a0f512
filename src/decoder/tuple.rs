//! Engine tuple syntax

/// Parse a single engine tuple such as `(a,"b, c",d)` into its values.
///
/// Double-quoted values may contain commas and escaped quotes; the quotes are
/// stripped. `()` and the bare `true` of closed formulas are the empty tuple.
/// Returns `None` for anything else, including several tuples on one line.
pub fn parse_tuple(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    if text == "true" {
        return Some(Vec::new());
    }

    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => current.push(chars.next()?),
            '"' => {
                if !in_quotes {
                    if quoted || !current.trim().is_empty() {
                        return None;
                    }
                    current.clear();
                }
                in_quotes = !in_quotes;
                quoted = true;
            }
            ',' if !in_quotes => {
                values.push(finish_value(&current, quoted));
                current.clear();
                quoted = false;
            }
            '(' | ')' if !in_quotes => return None,
            _ => {
                if quoted && !in_quotes {
                    if c.is_whitespace() {
                        continue;
                    }
                    // text after a closing quote
                    return None;
                }
                current.push(c);
            }
        }
    }

    if in_quotes {
        return None;
    }
    values.push(finish_value(&current, quoted));
    Some(values)
}

fn finish_value(raw: &str, quoted: bool) -> String {
    if quoted {
        raw.to_string()
    } else {
        raw.trim().to_string()
    }
}
