//! Tokenizer for the script language.
//!
//! Produces a flat token stream. Each token records whether a line break
//! preceded it, which the parser uses for semicolon insertion. Template
//! literals keep the raw source of their `${...}` parts; the parser parses
//! those separately.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while, take_while_m_n},
    character::complete::{
        alpha1, alphanumeric1, anychar, char, digit0, digit1, hex_digit1, multispace1, none_of,
        one_of,
    },
    combinator::{map, map_opt, opt, recognize, value},
    error::{ErrorKind, ParseError as NomParseError},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::fmt;

/// A compile-time error with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Description of the problem.
    pub message: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyntaxError: {} (line {}, column {})",
            self.message, self.line, self.column
        )
    }
}

impl std::error::Error for SyntaxError {}

/// A piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text, escapes already applied.
    Text(String),
    /// Raw source of an interpolated expression.
    Expr(String),
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal.
    Number(f64),
    /// String literal, escapes already applied.
    Str(String),
    /// Template literal.
    Template(Vec<TemplatePart>),
    /// Identifier or keyword.
    Ident(String),
    /// Operator or punctuation.
    Punct(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Str(_) => f.write_str("string"),
            Token::Template(_) => f.write_str("template string"),
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::Punct(p) => write!(f, "token '{p}'"),
        }
    }
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// Whether a line break separates this token from the previous one.
    pub newline_before: bool,
}

/// Longest first, so that prefixes never shadow longer operators.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "...", ">>>", "<<=", ">>=", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<",
    ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "&", "|",
    "^", "~", "!", "?", ":", "=", ".",
];

type Res<'a, T, E> = IResult<&'a str, T, E>;

fn fail<'a, T, E: NomParseError<&'a str>>(input: &'a str, kind: ErrorKind) -> Res<'a, T, E> {
    Err(nom::Err::Error(E::from_error_kind(input, kind)))
}

// ============================================================================
// Trivia
// ============================================================================

fn line_comment<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, &'a str, E> {
    recognize(pair(tag("//"), take_while(|c| c != '\n')))(input)
}

fn block_comment<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, &'a str, E> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Skips whitespace and comments. Reports whether a line break was skipped.
fn trivia<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, bool, E> {
    let (rest, skipped) =
        recognize(many0(alt((multispace1, line_comment, block_comment))))(input)?;
    Ok((rest, skipped.contains('\n')))
}

// ============================================================================
// Literals
// ============================================================================

fn number<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, Token, E> {
    if let Ok((rest, digits)) =
        preceded(alt((tag::<_, _, E>("0x"), tag("0X"))), hex_digit1)(input)
    {
        return match u64::from_str_radix(digits, 16) {
            Ok(n) => Ok((rest, Token::Number(n as f64))),
            Err(_) => fail(input, ErrorKind::HexDigit),
        };
    }

    let (rest, text) = recognize(pair(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    ))(input)?;
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, Token::Number(n))),
        Err(_) => fail(input, ErrorKind::Float),
    }
}

fn hex_code<'a, E: NomParseError<&'a str>>(len: usize) -> impl FnMut(&'a str) -> Res<'a, u32, E> {
    map_opt(
        take_while_m_n(len, len, |c: char| c.is_ascii_hexdigit()),
        |h: &str| u32::from_str_radix(h, 16).ok(),
    )
}

fn unicode_escape<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, char, E> {
    let (rest, high) = preceded(char('u'), hex_code(4))(input)?;
    if (0xD800..0xDC00).contains(&high) {
        let (rest, low) = preceded(tag("\\u"), hex_code(4))(rest)?;
        if !(0xDC00..0xE000).contains(&low) {
            return fail(input, ErrorKind::Char);
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        return match char::from_u32(code) {
            Some(c) => Ok((rest, c)),
            None => fail(input, ErrorKind::Char),
        };
    }
    match char::from_u32(high) {
        Some(c) => Ok((rest, c)),
        None => fail(input, ErrorKind::Char),
    }
}

/// The character after a backslash.
fn escape<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, char, E> {
    alt((
        value('\n', char('n')),
        value('\r', char('r')),
        value('\t', char('t')),
        value('\u{8}', char('b')),
        value('\u{c}', char('f')),
        value('\u{b}', char('v')),
        value('\0', char('0')),
        unicode_escape,
        map_opt(preceded(char('x'), hex_code(2)), char::from_u32),
        // \\ \" \' \/ and anything else stand for themselves
        anychar,
    ))(input)
}

fn double_quoted<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, String, E> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(none_of("\"\\\n"), '\\', escape)),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn single_quoted<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, String, E> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(none_of("'\\\n"), '\\', escape)),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(input)
}

/// Scans the source of a `${...}` part up to its closing brace.
fn interpolation<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, &'a str, E> {
    let mut depth = 0usize;
    let mut rest = input;
    loop {
        let Some(c) = rest.chars().next() else {
            return fail(input, ErrorKind::TakeUntil);
        };
        match c {
            '}' if depth == 0 => {
                let consumed = input.len() - rest.len();
                return Ok((&rest[1..], &input[..consumed]));
            }
            '}' => depth -= 1,
            '{' => depth += 1,
            '"' => {
                rest = double_quoted::<E>(rest)?.0;
                continue;
            }
            '\'' => {
                rest = single_quoted::<E>(rest)?.0;
                continue;
            }
            '`' => {
                rest = template::<E>(rest)?.0;
                continue;
            }
            _ => {}
        }
        rest = &rest[c.len_utf8()..];
    }
}

fn template<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, Vec<TemplatePart>, E> {
    let (mut rest, _) = char('`')(input)?;
    let mut parts = Vec::new();
    let mut text = String::new();
    loop {
        let Some(c) = rest.chars().next() else {
            return fail(input, ErrorKind::Char);
        };
        match c {
            '`' => {
                rest = &rest[1..];
                break;
            }
            '\\' => {
                let (r, escaped) = escape(&rest[1..])?;
                text.push(escaped);
                rest = r;
            }
            '$' if rest.starts_with("${") => {
                let (r, source) = interpolation(&rest[2..])?;
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                parts.push(TemplatePart::Expr(source.to_string()));
                rest = r;
            }
            _ => {
                text.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    if !text.is_empty() || parts.is_empty() {
        parts.push(TemplatePart::Text(text));
    }
    Ok((rest, parts))
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"), tag("$"))),
        many0(alt((alphanumeric1, tag("_"), tag("$")))),
    ))(input)
}

fn punct<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, Token, E> {
    for p in PUNCTUATORS {
        if input.starts_with(p) {
            // `a ?.5 : b` is a conditional, not optional chaining
            if *p == "?." && input[2..].starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            return Ok((&input[p.len()..], Token::Punct(p)));
        }
    }
    fail(input, ErrorKind::Tag)
}

fn token<'a, E: NomParseError<&'a str>>(input: &'a str) -> Res<'a, Token, E> {
    alt((
        number,
        map(double_quoted, Token::Str),
        map(single_quoted, Token::Str),
        map(template, Token::Template),
        map(identifier, |s: &str| Token::Ident(s.to_string())),
        punct,
    ))(input)
}

// ============================================================================
// Public API
// ============================================================================

/// Splits source text into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut line_start = 0;

    let advance = |from: &str, to: &str, line: &mut usize, line_start: &mut usize| {
        let start = source.len() - from.len();
        let consumed = &from[..from.len() - to.len()];
        for (i, c) in consumed.char_indices() {
            if c == '\n' {
                *line += 1;
                *line_start = start + i + 1;
            }
        }
    };

    loop {
        let (after, newline_before) = match trivia::<nom::error::Error<&str>>(rest) {
            Ok(ok) => ok,
            Err(_) => (rest, false),
        };
        advance(rest, after, &mut line, &mut line_start);
        rest = after;
        if rest.is_empty() {
            break;
        }

        let column = source.len() - rest.len() - line_start + 1;
        match token::<nom::error::Error<&str>>(rest) {
            Ok((after, token)) => {
                tokens.push(Spanned {
                    token,
                    line,
                    column,
                    newline_before,
                });
                advance(rest, after, &mut line, &mut line_start);
                rest = after;
            }
            Err(_) => {
                let message = if rest.starts_with(['"', '\'', '`']) {
                    "Invalid or unexpected token: unterminated string".to_string()
                } else {
                    let c = rest.chars().next().unwrap_or(' ');
                    format!("Invalid or unexpected token '{c}'")
                };
                return Err(SyntaxError::new(message, line, column));
            }
        }
    }
    Ok(tokens)
}
