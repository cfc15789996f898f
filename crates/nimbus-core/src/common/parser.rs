use std::fmt::{Debug, Formatter};

use nom::IResult;
use nom::combinator::all_consuming;
use nom::error::{ErrorKind, ParseError};

/// Remaining input at the point where parsing failed.
pub struct ParserError<'a> {
    remaining: &'a str,
    kind: ErrorKind,
}

impl Debug for ParserError<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.remaining.is_empty() {
            write!(f, "Unexpected end of input, expecting {:?}", self.kind)
        } else {
            write!(
                f,
                "Parser error at {:?}: expecting {:?}",
                self.remaining, self.kind
            )
        }
    }
}

impl<'a> ParseError<&'a str> for ParserError<'a> {
    fn from_error_kind(remaining: &'a str, kind: ErrorKind) -> Self {
        ParserError { remaining, kind }
    }

    fn append(_: &'a str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

pub type NomResult<'a, Ret> = IResult<&'a str, Ret, ParserError<'a>>;

/// Runs `parser` and fails unless the whole input was consumed.
pub fn consume_all<'a, O, F>(parser: F, input: &'a str) -> anyhow::Result<O>
where
    F: FnMut(&'a str) -> NomResult<'a, O>,
{
    match all_consuming(parser)(input) {
        Ok((_, output)) => Ok(output),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(anyhow::anyhow!("{e:?}")),
        Err(nom::Err::Incomplete(_)) => Err(anyhow::anyhow!("Incomplete input")),
    }
}
