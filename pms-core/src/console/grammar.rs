//! Lexer and parser for console lines.
//!
//! `regal` produces a bounded token stream; `winnow` parsers over the tokens
//! build a [`Command`]. Keywords match case-insensitively.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::error::ErrMode;
use winnow::prelude::*;

/// Maximum number of tokens per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// `0x`-prefixed integer.
    #[regex(r"0[xX][0-9A-Fa-f]+", priority = 2)]
    HexInteger,
    #[regex(r"[0-9]+")]
    Integer,
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with its byte span in the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long after {processed} tokens")
            }
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        lexeme: &'a str,
    },
    InvalidToken {
        lexeme: &'a str,
        span: Range<usize>,
    },
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found `{found}` at {}", span.start),
            GrammarError::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of line, expected {expected}")
            }
            GrammarError::InvalidInteger { lexeme } => write!(f, "invalid number `{lexeme}`"),
            GrammarError::InvalidToken { lexeme, span } => {
                write!(f, "unsupported input `{lexeme}` at {}", span.start)
            }
        }
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        match token {
            Some(token) if token.kind != TokenKind::Eol => GrammarError::UnexpectedToken {
                expected,
                found: token.lexeme,
                span: token.span.clone(),
            },
            _ => GrammarError::UnexpectedEnd { expected },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Raw device operation issued with `pms <action>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PmsAction {
    Off,
    Reset,
    HwSleep,
    Sleep,
    Passive,
    Normal,
    Measure,
    Wake,
}

impl PmsAction {
    pub const ALL: [PmsAction; 8] = [
        PmsAction::Off,
        PmsAction::Reset,
        PmsAction::HwSleep,
        PmsAction::Sleep,
        PmsAction::Passive,
        PmsAction::Normal,
        PmsAction::Measure,
        PmsAction::Wake,
    ];

    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            PmsAction::Off => "off",
            PmsAction::Reset => "reset",
            PmsAction::HwSleep => "hwsleep",
            PmsAction::Sleep => "sleep",
            PmsAction::Passive => "passive",
            PmsAction::Normal => "normal",
            PmsAction::Measure => "measure",
            PmsAction::Wake => "wake",
        }
    }

    fn find(lexeme: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.keyword().eq_ignore_ascii_case(lexeme))
    }
}

/// Parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Run,
    Stop,
    Stats,
    /// Show the mask, or replace it.
    DebugMask(Option<u32>),
    Pms(PmsAction),
    Interval {
        secs: u32,
        count: Option<u32>,
    },
    Status,
    Help {
        topic: Option<&'a str>,
    },
}

/// Help entry for one top-level command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "run",
        usage: "run",
        summary: "start the measurement loop",
    },
    CommandInfo {
        name: "stop",
        usage: "stop",
        summary: "stop the measurement loop",
    },
    CommandInfo {
        name: "stats",
        usage: "stats",
        summary: "show sensor receive counters",
    },
    CommandInfo {
        name: "debugmask",
        usage: "debugmask [mask]",
        summary: "show or set the diagnostic mask",
    },
    CommandInfo {
        name: "pms",
        usage: "pms <off|reset|hwsleep|sleep|passive|normal|measure|wake>",
        summary: "send a raw request to the sensor driver",
    },
    CommandInfo {
        name: "interval",
        usage: "interval <secs> [count=<n>]",
        summary: "set the uplink interval",
    },
    CommandInfo {
        name: "status",
        usage: "status",
        summary: "show driver and loop state",
    },
    CommandInfo {
        name: "help",
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

/// Looks up a help entry by command name.
#[must_use]
pub fn find_command(name: &str) -> Option<&'static CommandInfo> {
    COMMANDS
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
}

/// Tokenizes one line.
///
/// # Errors
///
/// Returns [`LexError`] when the line exceeds [`MAX_TOKENS`] or the lexer fails.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }
        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: MAX_TOKENS + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parses one console line.
///
/// # Errors
///
/// Returns [`ParseError`] for unknown commands, malformed arguments, or
/// trailing input.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::InvalidToken {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

type Failure<'src> = ErrMode<GrammarError<'src>>;

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, Failure<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command").parse_next(input)?;
        let Some(info) = find_command(keyword.lexeme) else {
            return Err(ErrMode::Cut(GrammarError::unexpected(
                "command",
                Some(&keyword),
            )));
        };

        match info.name {
            "run" => Ok(Command::Run),
            "stop" => Ok(Command::Stop),
            "stats" => Ok(Command::Stats),
            "status" => Ok(Command::Status),
            "debugmask" => {
                let mask = optional_integer(input)?;
                Ok(Command::DebugMask(mask))
            }
            "pms" => {
                let token = expect_kind(TokenKind::Ident, "pms action").parse_next(input)?;
                PmsAction::find(token.lexeme)
                    .map(Command::Pms)
                    .ok_or_else(|| {
                        ErrMode::Cut(GrammarError::unexpected("pms action", Some(&token)))
                    })
            }
            "interval" => {
                let token = expect_integer(input)?;
                let secs = parse_integer(&token).map_err(ErrMode::Cut)?;
                let count = count_assignment(input)?;
                Ok(Command::Interval { secs, count })
            }
            _ => {
                let topic = match input.split_first() {
                    Some((token, rest)) if token.kind == TokenKind::Ident => {
                        *input = rest;
                        Some(token.lexeme)
                    }
                    _ => None,
                };
                Ok(Command::Help { topic })
            }
        }
    }
}

fn optional_integer<'src>(input: &mut Input<'src, '_>) -> Result<Option<u32>, Failure<'src>> {
    match input.split_first() {
        Some((token, rest))
            if matches!(token.kind, TokenKind::Integer | TokenKind::HexInteger) =>
        {
            *input = rest;
            parse_integer(token).map(Some).map_err(ErrMode::Cut)
        }
        _ => Ok(None),
    }
}

fn expect_integer<'src>(input: &mut Input<'src, '_>) -> Result<Token<'src>, Failure<'src>> {
    match input.split_first() {
        Some((token, rest))
            if matches!(token.kind, TokenKind::Integer | TokenKind::HexInteger) =>
        {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Cut(GrammarError::unexpected(
            "integer",
            other.map(|(token, _)| token),
        ))),
    }
}

fn count_assignment<'src>(input: &mut Input<'src, '_>) -> Result<Option<u32>, Failure<'src>> {
    match input.split_first() {
        Some((token, rest))
            if token.kind == TokenKind::Ident && token.lexeme.eq_ignore_ascii_case("count") =>
        {
            *input = rest;
            let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;
            let value = expect_integer(input)?;
            parse_integer(&value).map(Some).map_err(ErrMode::Cut)
        }
        _ => Ok(None),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, Failure<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Cut(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}

fn parse_integer<'a>(token: &Token<'a>) -> Result<u32, GrammarError<'a>> {
    let text = token.lexeme;
    let parsed = match text.get(..2) {
        Some("0x" | "0X") => u32::from_str_radix(&text[2..], 16),
        _ => text.parse::<u32>(),
    };
    parsed.map_err(|_| GrammarError::InvalidInteger { lexeme: text })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("run"), Command::Run);
        assert_eq!(parse_ok("STOP\r\n"), Command::Stop);
        assert_eq!(parse_ok("stats"), Command::Stats);
        assert_eq!(parse_ok("status\n"), Command::Status);
    }

    #[test]
    fn parses_debugmask_forms() {
        assert_eq!(parse_ok("debugmask"), Command::DebugMask(None));
        assert_eq!(parse_ok("debugmask 5"), Command::DebugMask(Some(5)));
        assert_eq!(
            parse_ok("debugmask 0x30"),
            Command::DebugMask(Some(0x30))
        );
    }

    #[test]
    fn parses_pms_actions() {
        assert_eq!(parse_ok("pms hwsleep"), Command::Pms(PmsAction::HwSleep));
        assert_eq!(parse_ok("pms Wake"), Command::Pms(PmsAction::Wake));

        match parse("pms nap") {
            Err(ParseError::Grammar(GrammarError::UnexpectedToken { found, .. })) => {
                assert_eq!(found, "nap");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_interval_with_optional_count() {
        assert_eq!(
            parse_ok("interval 60"),
            Command::Interval {
                secs: 60,
                count: None
            }
        );
        assert_eq!(
            parse_ok("interval 30 count=4"),
            Command::Interval {
                secs: 30,
                count: Some(4)
            }
        );
        assert!(parse("interval").is_err());
        assert!(parse("interval 30 count").is_err());
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(parse_ok("help"), Command::Help { topic: None });
        assert_eq!(
            parse_ok("help interval"),
            Command::Help {
                topic: Some("interval")
            }
        );
    }

    #[test]
    fn rejects_unknown_and_trailing_input() {
        match parse("reboot") {
            Err(ParseError::Grammar(GrammarError::UnexpectedToken { expected, .. })) => {
                assert_eq!(expected, "command");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(parse("run now").is_err());
        match parse("stats ?") {
            Err(ParseError::Grammar(GrammarError::InvalidToken { lexeme, .. })) => {
                assert_eq!(lexeme, "?");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_numbers() {
        match parse("debugmask 99999999999") {
            Err(ParseError::Grammar(GrammarError::InvalidInteger { lexeme })) => {
                assert_eq!(lexeme, "99999999999");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
