use crate::command::{Command, Pipeline, RedirectKind};
use thiserror::Error;

/// Errors that can occur while turning a line into a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingError {
    /// A `<`, `>` or `>>` operator was the last token of its stage.
    #[error("missing file name for redirection")]
    MissingRedirectTarget,
    /// A `|` with nothing on one of its sides, e.g. `ls |`.
    #[error("syntax error near unexpected token `|'")]
    EmptyStage,
}

fn is_splitter(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Whitespace-delimited tokens together with their byte offsets in `line`.
fn tokens_with_offsets(line: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        if is_splitter(c) {
            if let Some(s) = start.take() {
                tokens.push((s, &line[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push((s, &line[s..]));
    }
    tokens
}

/// Cut the line into per-stage slices at every standalone `|` token.
///
/// A `|` that directly follows a bare redirection operator is that operator's
/// file name, not a stage boundary.
fn split_stages(line: &str) -> Vec<&str> {
    let mut stages = Vec::new();
    let mut start = 0;
    let mut at_name = true;
    let mut expect_target = false;
    for (offset, token) in tokens_with_offsets(line) {
        if expect_target {
            expect_target = false;
            continue;
        }
        if token == "|" {
            stages.push(&line[start..offset]);
            start = offset + 1;
            at_name = true;
            continue;
        }
        expect_target = !at_name && matches!(redirect_operator(token), Some((_, "")));
        at_name = false;
    }
    stages.push(&line[start..]);
    stages
}

/// Recognize a redirection operator at the start of a token.
///
/// Returns the kind and whatever follows the operator inside the same token.
fn redirect_operator(token: &str) -> Option<(RedirectKind, &str)> {
    if let Some(rest) = token.strip_prefix(">>") {
        Some((RedirectKind::Append, rest))
    } else if let Some(rest) = token.strip_prefix('>') {
        Some((RedirectKind::Truncate, rest))
    } else {
        token
            .strip_prefix('<')
            .map(|rest| (RedirectKind::Input, rest))
    }
}

/// Remove one matching pair of surrounding single or double quotes.
fn strip_quotes(token: &str) -> &str {
    let bytes = token.as_bytes();
    let len = bytes.len();
    if len > 2 && bytes[0] == bytes[len - 1] && matches!(bytes[0], b'"' | b'\'') {
        &token[1..len - 1]
    } else {
        token
    }
}

/// Parse a single stage. On failure the command built so far is returned
/// alongside the error.
fn parse_stage(slice: &str) -> (Command, Option<ParsingError>) {
    let mut tokens = slice.split(is_splitter).filter(|t| !t.is_empty());
    let Some(name) = tokens.next() else {
        return (Command::new(""), None);
    };

    let mut cmd = Command::new(name);
    while let Some(token) = tokens.next() {
        if token == "&" {
            continue;
        }

        if let Some((kind, attached)) = redirect_operator(token) {
            let target = if attached.is_empty() {
                match tokens.next() {
                    Some(t) => t,
                    None => return (cmd, Some(ParsingError::MissingRedirectTarget)),
                }
            } else {
                attached
            };
            cmd.redirects.set(kind, target);
            continue;
        }

        cmd.args.push(strip_quotes(token).to_string());
    }
    (cmd, None)
}

/// Parse one input line into a pipeline.
///
/// Parsing never fails structurally: the returned pipeline always has at least
/// one stage. When a stage is malformed, parsing stops there and the error is
/// recorded on [`Pipeline::error`].
pub fn parse(line: &str) -> Pipeline {
    let mut rest = line.trim_matches(is_splitter);
    let mut auto_complete = false;
    let mut background = false;

    if let Some(stripped) = rest.strip_suffix('?') {
        auto_complete = true;
        rest = stripped;
    } else if rest.ends_with('&') {
        background = true;
    }

    let slices = split_stages(rest);
    let piped = slices.len() > 1;
    let mut stages = Vec::with_capacity(slices.len());
    let mut error = None;

    for slice in slices {
        let (mut cmd, err) = parse_stage(slice);
        cmd.background = background;
        let empty = cmd.name.is_empty();
        stages.push(cmd);
        if let Some(e) = err {
            error = Some(e);
            break;
        }
        if piped && empty {
            error = Some(ParsingError::EmptyStage);
            break;
        }
    }

    stages[0].auto_complete = auto_complete;
    tracing::debug!(stages = stages.len(), background, ?error, "parsed line");
    Pipeline { stages, error }
}
