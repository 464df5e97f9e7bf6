use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::tokenizer::{tokenize, TokenKind};

#[derive(Clone)]
pub struct REPLPrompt;

impl Prompt for REPLPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("loxen")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed("❯ ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

/// Marks a submission incomplete while delimiters or a string literal
/// are still open, so multi-line programs can be typed naturally.
pub struct REPLValidator;

impl Validator for REPLValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        if line.trim_end().is_empty() {
            return ValidationResult::Complete;
        }

        let mut delimiters = Vec::new();
        let mut in_string = false;

        // String literals have no escape sequences; a quote always
        // toggles.
        for c in line.chars() {
            match c {
                '"' => in_string = !in_string,
                _ if in_string => (),
                '{' | '(' => delimiters.push(c),
                '}' => {
                    if delimiters.pop() != Some('{') {
                        return ValidationResult::Complete;
                    }
                }
                ')' => {
                    if delimiters.pop() != Some('(') {
                        return ValidationResult::Complete;
                    }
                }
                _ => (),
            }
        }

        if in_string || !delimiters.is_empty() {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Complete
        }
    }
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;

pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        let (tokens, errors) = tokenize(line);
        if !errors.is_empty() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), line.to_string()));
            return styled_text;
        }

        let mut remaining = line;

        for token in &tokens {
            if token.kind == TokenKind::Eof {
                break;
            }

            if let Some(pos) = remaining.find(&token.lexeme) {
                if pos > 0 {
                    styled_text
                        .push((Style::new().fg(DEFAULT_COLOR), remaining[..pos].to_string()));
                }

                let color = color_for(token.kind);
                styled_text.push((Style::new().fg(color), token.lexeme.clone()));
                remaining = &remaining[pos + token.lexeme.len()..];
            }
        }

        if !remaining.is_empty() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining.to_string()));
        }

        styled_text
    }
}

fn color_for(kind: TokenKind) -> Color {
    match kind {
        TokenKind::And
        | TokenKind::Or
        | TokenKind::If
        | TokenKind::Else
        | TokenKind::True
        | TokenKind::False
        | TokenKind::Nil
        | TokenKind::For
        | TokenKind::While
        | TokenKind::Fun
        | TokenKind::Var
        | TokenKind::Print
        | TokenKind::Return => KEYWORD_COLOR,
        TokenKind::String | TokenKind::Number => LITERAL_COLOR,
        TokenKind::Identifier | TokenKind::Eof => DEFAULT_COLOR,
        _ => OPERATOR_COLOR,
    }
}
