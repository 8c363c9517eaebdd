//! `Sec-WebSocket-Extensions` header parsing and formatting.
//!
//! ```text
//! Sec-WebSocket-Extensions = extension-list
//! extension-list           = 1#extension
//! extension                = extension-token *( ";" extension-param )
//! extension-param          = token [ "=" (token | quoted-string) ]
//! ```
//!
//! A quoted parameter value must still be a token once unescaped.

use std::fmt;
use std::str::FromStr;

use http::{header, HeaderMap, HeaderValue};

use crate::grammar::{self, ParseError};
use crate::headers::to_str;
use crate::{Result, WebSocketError};

/// A single extension parameter. An empty `value` means the parameter has no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionParam {
    pub name: String,
    pub value: String,
}

impl ExtensionParam {
    /// Creates a parameter without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
        }
    }

    /// Creates a parameter with a value.
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns `true` if the parameter carries no value.
    pub fn is_flag(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}={}", self.name, grammar::format_string(&self.value))
        }
    }
}

/// A named extension offer with its parameters in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub params: Vec<ExtensionParam>,
}

impl Extension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Appends a parameter, builder style.
    pub fn with_param(mut self, param: ExtensionParam) -> Self {
        self.params.push(param);
        self
    }

    /// Returns the first parameter named `name`.
    pub fn param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|param| param.name == name)
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            write!(f, "; {param}")?;
        }
        Ok(())
    }
}

/// An ordered list of extension offers.
///
/// The [`Display`](fmt::Display) output is the canonical header form: extensions are joined
/// by `", "` and parameters by `"; "`, whatever the spacing of the parsed input was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(pub Vec<Extension>);

impl Extensions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extension> {
        self.0.iter()
    }
}

impl From<Vec<Extension>> for Extensions {
    fn from(extensions: Vec<Extension>) -> Self {
        Self(extensions)
    }
}

impl<'a> IntoIterator for &'a Extensions {
    type Item = &'a Extension;
    type IntoIter = std::slice::Iter<'a, Extension>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, extension) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{extension}")?;
        }
        Ok(())
    }
}

impl FromStr for Extensions {
    type Err = ParseError;

    /// Parses a single header value. At least one extension is required.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        parse_extension_list(value).map(Self)
    }
}

/// Parses every `Sec-WebSocket-Extensions` value in `headers`, concatenated in header order.
///
/// A missing header yields an empty list. Any value that is not a valid non-empty extension
/// list fails the whole header.
pub fn parse_header(headers: &HeaderMap) -> Result<Extensions> {
    let mut extensions = Vec::new();
    for value in headers.get_all(header::SEC_WEBSOCKET_EXTENSIONS) {
        let value = to_str(&header::SEC_WEBSOCKET_EXTENSIONS, value)?;
        let parsed = parse_extension_list(value).map_err(|source| WebSocketError::Parse {
            header: header::SEC_WEBSOCKET_EXTENSIONS,
            source,
        })?;
        extensions.extend(parsed);
    }
    Ok(Extensions(extensions))
}

/// Replaces the `Sec-WebSocket-Extensions` header with the canonical form of `extensions`.
pub fn set_header(headers: &mut HeaderMap, extensions: &Extensions) -> Result<()> {
    let value = HeaderValue::try_from(extensions.to_string())?;
    headers.insert(header::SEC_WEBSOCKET_EXTENSIONS, value);
    Ok(())
}

fn parse_extension_list(value: &str) -> std::result::Result<Vec<Extension>, ParseError> {
    let mut extensions = Vec::new();
    let mut rest = grammar::trim_left_comma_or_space(value);
    loop {
        let (extension, remaining) = parse_extension(rest).map_err(|err| err.in_value(value))?;
        extensions.push(extension);

        if remaining.is_empty() {
            return Ok(extensions);
        }
        if !remaining.starts_with(',') {
            let found = remaining.chars().next().unwrap_or_default();
            return Err(ParseError::Unexpected {
                expected: "','",
                found,
            }
            .in_value(value));
        }

        rest = grammar::trim_left_comma_or_space(remaining);
        if rest.is_empty() {
            return Ok(extensions);
        }
    }
}

fn parse_extension(s: &str) -> std::result::Result<(Extension, &str), ParseError> {
    let (name, mut rest) =
        grammar::read_token(s).map_err(|err| err.context("extension name"))?;

    let mut extension = Extension::new(name);
    while let Some(after) = rest.strip_prefix(';') {
        let (param, remaining) = parse_param(grammar::trim_left_space(after))?;
        extension.params.push(param);
        rest = remaining;
    }
    Ok((extension, rest))
}

fn parse_param(s: &str) -> std::result::Result<(ExtensionParam, &str), ParseError> {
    let (name, rest) = grammar::read_token(s).map_err(|err| err.context("parameter name"))?;

    let Some(after) = rest.strip_prefix('=') else {
        return Ok((ExtensionParam::new(name), rest));
    };

    let (value, rest) = grammar::read_string(grammar::trim_left_space(after))
        .map_err(|err| err.context("parameter value"))?;
    if !grammar::is_token(&value) {
        return Err(ParseError::InvalidToken(value.into_owned()).context("parameter value"));
    }
    Ok((ExtensionParam::with_value(name, value), rest))
}
