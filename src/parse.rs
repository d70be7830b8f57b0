use std::fmt;
use std::ops::Range;
use winnow::error::ContextError;

/// The error type returned when parsing one of the text formats of this
/// crate fails.
///
/// It renders the offending input with the failing span underlined.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: Range<usize>,
    title: String,
}

impl ParseError {
    pub(crate) fn from_parse(
        error: winnow::error::ParseError<&str, ContextError>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            input: error.input().to_string(),
            span: error.char_span(),
            title: title.into(),
        }
    }

    /// An error covering all of `input`, for text that parsed but describes
    /// something invalid.
    pub(crate) fn whole(input: &str, title: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            span: 0..input.len(),
            title: title.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Byte range of the input the error points at.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error.title(&self.title).snippet(
            annotate_snippets::Snippet::source(&self.input)
                .fold(true)
                .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
        );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}
