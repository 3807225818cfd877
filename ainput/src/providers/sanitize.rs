//! Scrub credentials out of vendor error text before it reaches the UI.

const MAX_MESSAGE_CHARS: usize = 200;
const REDACTED: &str = "[REDACTED]";
/// Shorter "keys" are placeholders and would mangle ordinary words.
const MIN_KEY_CHARS: usize = 8;

/// Prefixes of vendor keys that can show up in echoed requests.
const SECRET_PREFIXES: [&str; 3] = ["sk-", "AIza", "xoxb-"];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn redact_prefixed(input: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(prefix) {
        let tail = &rest[pos + prefix.len()..];
        // Mid-word match such as "task-1".
        if rest[..pos].chars().next_back().is_some_and(is_token_char) {
            out.push_str(&rest[..pos + prefix.len()]);
            rest = tail;
            continue;
        }
        let token_len: usize = tail
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();
        out.push_str(&rest[..pos]);
        if token_len == 0 {
            // Bare prefix, e.g. the word "sk-" in prose.
            out.push_str(prefix);
        } else {
            out.push_str(REDACTED);
        }
        rest = &tail[token_len..];
    }
    out.push_str(rest);
    out
}

/// Remove the profile's key and anything key-shaped, then cap the length.
pub fn redact(message: &str, api_key: &str) -> String {
    let mut text = message.trim().to_string();
    let key = api_key.trim();
    if key.chars().count() >= MIN_KEY_CHARS {
        text = text.replace(key, REDACTED);
    }
    for prefix in SECRET_PREFIXES {
        text = redact_prefixed(&text, prefix);
    }

    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
