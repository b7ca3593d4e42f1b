//! Static checks run before compilation: characters, parentheses and
//! identifier allow-listing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::compile::is_builtin_name;
use super::lexer::{TokenKind, tokenize};
use super::{PixelMathProgram, ProgramChannel, allowed_variables};

/// First problem found in an expression. Positions are character indices.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationIssue {
    #[error("Expression is empty")]
    Empty,

    #[error("Character {ch:?} is not allowed at position {position}")]
    DisallowedCharacter { ch: char, position: usize },

    #[error("Unbalanced parenthesis at position {position}")]
    UnbalancedParentheses { position: usize },

    #[error("Unknown identifier `{name}` at position {position}")]
    UnknownIdentifier { name: String, position: usize },
}

impl ValidationIssue {
    pub fn position(&self) -> Option<usize> {
        match self {
            ValidationIssue::Empty => None,
            ValidationIssue::DisallowedCharacter { position, .. }
            | ValidationIssue::UnbalancedParentheses { position }
            | ValidationIssue::UnknownIdentifier { position, .. } => Some(*position),
        }
    }
}

/// A validation issue tagged with the channel it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Channel {channel}: {issue}")]
pub struct ChannelIssue {
    pub channel: ProgramChannel,
    pub issue: ValidationIssue,
}

#[inline]
fn is_allowed_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ch == '_'
        || ch.is_whitespace()
        || "+-*/%^().,<>!=&|?:".contains(ch)
}

/// Check `expr` against the allowed characters, parenthesis balance and the
/// identifier allow-list (built-ins plus `allowed_vars`).
///
/// Malformed operator sequences that pass these checks are reported later by
/// compilation.
pub fn validate_expression(expr: &str, allowed_vars: &[&str]) -> Result<(), ValidationIssue> {
    if expr.trim().is_empty() {
        return Err(ValidationIssue::Empty);
    }

    if let Some((position, ch)) = expr.chars().enumerate().find(|&(_, ch)| !is_allowed_char(ch)) {
        return Err(ValidationIssue::DisallowedCharacter { ch, position });
    }

    // All characters are ASCII from here on, so byte and character indices agree
    let mut open = Vec::new();
    for (position, b) in expr.bytes().enumerate() {
        match b {
            b'(' => open.push(position),
            b')' => {
                if open.pop().is_none() {
                    return Err(ValidationIssue::UnbalancedParentheses { position });
                }
            }
            _ => {}
        }
    }
    if let Some(&position) = open.last() {
        return Err(ValidationIssue::UnbalancedParentheses { position });
    }

    let Ok(tokens) = tokenize(expr) else {
        return Ok(());
    };
    for token in tokens {
        if let TokenKind::Ident(name) = token.kind
            && !is_builtin_name(&name)
            && !allowed_vars.contains(&name.as_str())
        {
            return Err(ValidationIssue::UnknownIdentifier {
                name,
                position: token.position,
            });
        }
    }
    Ok(())
}

/// Validate all three channel expressions against the variables available
/// for `layer_count` layers, collecting every failing channel.
pub fn validate_program(
    program: &PixelMathProgram,
    layer_count: usize,
) -> Result<(), Vec<ChannelIssue>> {
    let names = allowed_variables(layer_count);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let issues: Vec<ChannelIssue> = program
        .channels()
        .into_iter()
        .filter_map(|(channel, expr)| {
            validate_expression(expr, &names)
                .err()
                .map(|issue| ChannelIssue { channel, issue })
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
