//! Origin authorization for incoming handshakes.

use http::{header, HeaderMap, Uri};

use crate::{Result, WebSocketError};

/// Checks the request's `Origin` against its host and the authorized `patterns`.
///
/// Requests without an `Origin` header are not from browsers and are always allowed. A
/// same-host origin is always allowed. Otherwise the origin's `host[:port]` must match one
/// of the patterns, compared case-insensitively.
///
/// The origin's authority is compared as the client wrote it: `https://example.com:443`
/// is the same host as `example.com:443` but not as `example.com`.
pub fn authenticate_origin<S: AsRef<str>>(
    headers: &HeaderMap,
    host: &str,
    patterns: &[S],
) -> Result<()> {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    if origin.is_empty() {
        return Ok(());
    }

    let origin = origin
        .to_str()
        .map_err(|_| WebSocketError::InvalidOrigin(String::from_utf8_lossy(origin.as_bytes()).into()))?;
    let invalid = || WebSocketError::InvalidOrigin(origin.to_owned());
    let uri: Uri = origin.parse().map_err(|_| invalid())?;
    let authority = match (uri.scheme(), uri.authority()) {
        (Some(_), Some(authority)) => authority,
        _ => return Err(invalid()),
    };
    // kept as sent, default ports included
    let origin_host = match authority.port() {
        Some(port) => format!("{}:{}", authority.host(), port.as_str()),
        None => authority.host().to_owned(),
    };

    if origin_host.eq_ignore_ascii_case(host) {
        return Ok(());
    }

    for pattern in patterns {
        let pattern = pattern.as_ref();
        if glob_match(pattern, &origin_host)? {
            return Ok(());
        }
    }

    Err(WebSocketError::OriginNotAuthorized {
        origin: origin.to_owned(),
        host: host.to_owned(),
    })
}

/// Matches `s` against a shell glob, ignoring ASCII case.
///
/// ```text
/// pattern = { term }
/// term    = '*'          any sequence of non-'/' characters
///         | '?'          any single non-'/' character
///         | '[' [ '^' ] { range } ']'
///         | '\' c        matches c
///         | c            matches c
/// range   = c | c '-' c
/// ```
///
/// A malformed pattern is an error even when the input could never match it.
pub fn glob_match(pattern: &str, s: &str) -> Result<bool> {
    let terms = compile(&pattern.to_ascii_lowercase())
        .ok_or_else(|| WebSocketError::BadOriginPattern(pattern.to_owned()))?;
    let input: Vec<char> = s.to_ascii_lowercase().chars().collect();
    Ok(match_terms(&terms, &input))
}

#[derive(Debug, PartialEq)]
enum Term {
    Literal(char),
    Any,
    Star,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Term {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Literal(literal) => *literal == c,
            Self::Any => c != '/',
            Self::Star => false,
            Self::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
            }
        }
    }
}

fn compile(pattern: &str) -> Option<Vec<Term>> {
    let mut chars = pattern.chars().peekable();
    let mut terms = Vec::new();

    while let Some(c) = chars.next() {
        let term = match c {
            '*' => {
                if terms.last() == Some(&Term::Star) {
                    continue;
                }
                Term::Star
            }
            '?' => Term::Any,
            '\\' => Term::Literal(chars.next()?),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                loop {
                    if !ranges.is_empty() && chars.next_if_eq(&']').is_some() {
                        break;
                    }
                    let lo = class_char(&mut chars)?;
                    let hi = match chars.next_if_eq(&'-') {
                        Some(_) => class_char(&mut chars)?,
                        None => lo,
                    };
                    ranges.push((lo, hi));
                }
                Term::Class { negated, ranges }
            }
            c => Term::Literal(c),
        };
        terms.push(term);
    }

    Some(terms)
}

fn class_char(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<char> {
    match chars.next()? {
        '-' | ']' => None,
        '\\' => chars.next(),
        c => Some(c),
    }
}

/// Backtracks only to the most recent star, so the cost stays within
/// `terms.len() * s.len()` steps whatever the input.
fn match_terms(terms: &[Term], s: &[char]) -> bool {
    let (mut t, mut i) = (0, 0);
    // term after the last star seen, and where its attempt started
    let mut resume: Option<(usize, usize)> = None;

    while i < s.len() {
        match terms.get(t) {
            Some(Term::Star) => {
                t += 1;
                resume = Some((t, i));
            }
            Some(term) if term.matches(s[i]) => {
                t += 1;
                i += 1;
            }
            _ => match resume {
                // let the star swallow one more character, never a '/'
                Some((next, start)) if s[start] != '/' => {
                    resume = Some((next, start + 1));
                    t = next;
                    i = start + 1;
                }
                _ => return false,
            },
        }
    }

    terms[t..].iter().all(|term| *term == Term::Star)
}
