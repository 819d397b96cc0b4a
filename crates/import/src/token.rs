use serde::{Deserialize, Serialize};

/// A run of text shown on a page, positioned in PDF user space: origin at the
/// bottom-left, `y` grows upwards, `(x, y)` is the text baseline start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToken {
    pub text: String,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl TextToken {
    pub fn new(text: impl Into<String>, page: u32, x: f64, y: f64) -> Self {
        let text = text.into();
        let width = text.chars().count() as f64 * 4.5;
        TextToken {
            text,
            page,
            x,
            y,
            width,
            height: 9.0,
        }
    }
}

/// Tokens in extraction order. Reading order is not meaningful; only geometry is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStream {
    pub tokens: Vec<TextToken>,
    pub pages: u32,
}

impl TokenStream {
    pub fn new(tokens: Vec<TextToken>) -> Self {
        let pages = tokens.iter().map(|t| t.page).max().unwrap_or(0);
        TokenStream { tokens, pages }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// All text joined with spaces, for marker and header searches.
    pub fn plain_text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
