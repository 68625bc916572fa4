//! Tokenizers turning template text into [Block]s.
//!
//! [tokenize_template] splits text from `{{ }}` regions, and [tokenize_code] splits one region into its tokens.
//! Both make a single left-to-right pass. Inside a region, the first character of a token decides its kind:
//! `$` starts a variable, a quote starts a value, a token with an unquoted `=` is a named argument and anything
//! else is a function name. Quotes have no escape sequences; a value ends at the next matching quote.
//!
//! Delimiters, quotes and separators are all ASCII, so byte positions found here are always char boundaries.

use crate::blocks::{Block, CodeBlock, FunctionIdBlock, NamedArgBlock, TextBlock, ValBlock, VarBlock};
use crate::prompt::errors::TemplateError;

/// Split a template into text blocks and code blocks.
///
/// An unterminated `{{` or an unterminated quote inside `{{ }}` fails immediately. `{{ }}` with nothing but
/// whitespace inside is kept as text.
pub fn tokenize_template(text: &str) -> Result<Vec<Block>, TemplateError> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while cursor + 1 < bytes.len() {
        if bytes[cursor] != b'{' || bytes[cursor + 1] != b'{' {
            cursor += 1;
            continue;
        }
        let (open, code_end) = find_code_region(bytes, cursor)?;
        let code_start = open + 2;

        if text_start < open {
            blocks.push(Block::Text(TextBlock::new(&text[text_start..open])));
        }
        let code = &text[code_start..code_end];
        if code.trim().is_empty() {
            blocks.push(Block::Text(TextBlock::new(&text[open..code_end + 2])));
        } else {
            let block = CodeBlock::parse(code).map_err(|e| e.shifted(code_start))?;
            blocks.push(Block::Code(block));
        }
        cursor = code_end + 2;
        text_start = cursor;
    }

    if text_start < text.len() {
        blocks.push(Block::Text(TextBlock::new(&text[text_start..])));
    }
    Ok(blocks)
}

/// Split the inside of one `{{ }}` region into blocks. Whitespace only separates tokens.
pub fn tokenize_code(content: &str) -> Result<Vec<Block>, TemplateError> {
    let bytes = content.as_bytes();
    let mut blocks = Vec::new();
    let mut cursor = skip_whitespace(bytes, 0);

    while cursor < bytes.len() {
        let start = cursor;
        if is_quote(bytes[start]) {
            let end = find_closing_quote(bytes, start)?;
            blocks.push(Block::Value(ValBlock::new(&content[start..=end])));
            cursor = end + 1;
        } else {
            let end = scan_bare_token(bytes, start)?;
            blocks.push(classify_bare_token(&content[start..end])?);
            cursor = end;
        }
        cursor = skip_whitespace(bytes, cursor);
    }
    Ok(blocks)
}

fn classify_bare_token(token: &str) -> Result<Block, TemplateError> {
    if token.starts_with('$') {
        Ok(Block::Variable(VarBlock::new(token)))
    } else if token.contains('=') {
        Ok(Block::NamedArg(NamedArgBlock::new(token)?))
    } else {
        Ok(Block::FunctionId(FunctionIdBlock::new(token)?))
    }
}

/// Start and end of the region opened at `open`, as the indexes of its `{{` and `}}`.
///
/// Quotes hide `}}`. A later unquoted `{{` restarts the region, so in `{{{$x}}}` the region is `{{$x}}` and the
/// extra braces stay text.
fn find_code_region(bytes: &[u8], mut open: usize) -> Result<(usize, usize), TemplateError> {
    let mut quote: Option<(u8, usize)> = None;
    let mut cursor = open + 1;
    while cursor < bytes.len() {
        let c = bytes[cursor];
        let next = bytes.get(cursor + 1);
        match quote {
            Some((q, _)) if c == q => quote = None,
            Some(_) => {}
            None if c == b'{' && next == Some(&b'{') => open = cursor,
            None if is_quote(c) => quote = Some((c, cursor)),
            None if c == b'}' && next == Some(&b'}') && cursor >= open + 2 => return Ok((open, cursor)),
            None => {}
        }
        cursor += 1;
    }
    match quote {
        Some((_, position)) => Err(TemplateError::UnterminatedQuote { position }),
        None => Err(TemplateError::UnterminatedCode { position: open }),
    }
}

fn find_closing_quote(bytes: &[u8], open: usize) -> Result<usize, TemplateError> {
    let quote = bytes[open];
    bytes[open + 1..].iter()
        .position(|&c| c == quote)
        .map(|offset| open + 1 + offset)
        .ok_or(TemplateError::UnterminatedQuote { position: open })
}

/// Exclusive end of the bare token starting at `start`.
///
/// Whitespace ends a token, except around the `=` of a named argument: `name = 'value'` is one token. A quote after
/// `=` runs to its matching quote, so quoted values may hold whitespace.
fn scan_bare_token(bytes: &[u8], start: usize) -> Result<usize, TemplateError> {
    let is_variable = bytes[start] == b'$';
    let mut has_separator = false;
    let mut cursor = start;

    while cursor < bytes.len() {
        let c = bytes[cursor];
        if c.is_ascii_whitespace() {
            if is_variable {
                break;
            }
            let next = skip_whitespace(bytes, cursor);
            let value_pending = has_separator && bytes[cursor - 1] == b'=';
            let separator_follows = !has_separator && bytes.get(next) == Some(&b'=');
            if value_pending || separator_follows {
                cursor = next;
                continue;
            }
            break;
        }
        if c == b'=' {
            has_separator = true;
        } else if has_separator && is_quote(c) {
            cursor = find_closing_quote(bytes, cursor)?;
        }
        cursor += 1;
    }
    Ok(cursor)
}

fn skip_whitespace(bytes: &[u8], mut cursor: usize) -> usize {
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
        cursor += 1;
    }
    cursor
}

#[inline]
fn is_quote(c: u8) -> bool {
    c == b'\'' || c == b'"'
}
