use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;
use serde_json::Value;


lazy_static! {
    static ref VALID_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_]*$").unwrap();
    static ref VALID_FUNCTION_ID_RE: Regex = Regex::new(r"^[a-zA-Z0-9_.]*$").unwrap();
}

/// Prefix of a variable reference, as in `$name`.
pub const VAR_PREFIX: char = '$';

/// Separator between a plugin name and a function name, as in `plugin.function`.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Separator between the name and the value of a named argument, as in `name='value'`.
pub const NAMED_ARG_SEPARATOR: char = '=';

/// Whether `name` only contains ASCII letters, digits and underscores. An empty name matches.
#[inline]
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME_RE.is_match(name)
}

/// Like [is_valid_name] but also allows dots.
#[inline]
pub fn is_valid_function_id(id: &str) -> bool {
    VALID_FUNCTION_ID_RE.is_match(id)
}

#[inline]
pub fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

/// Whether the string starts and ends with the same quote character and has room for both.
pub fn is_quoted(string: &str) -> bool {
    let mut chars = string.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) => is_quote(first) && first == last,
        _ => false,
    }
}

/// Strips one matching pair of quotes. Returns the input untouched if it is not quoted.
pub fn strip_quotes(string: &str) -> &str {
    if is_quoted(string) {
        &string[1..string.len() - 1]
    } else {
        string
    }
}

/// Converts a rendered value into the text that lands in a prompt.
///
/// `Null` renders as nothing, strings render without JSON quoting, anything else renders as JSON.
pub fn value_to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}
