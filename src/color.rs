//! Segmented color output for status lines.
//!
//! A line is a sequence of `{color, literal-or-format}` segments rendered in
//! one pass, so a single call can mix colors and printf-style formatting
//! without issuing one write per color change. Rendering emits ANSI SGR
//! codes directly and always ends with a reset.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Fixed palette plus a reset token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Reset,
}

impl Color {
    fn sgr(self) -> &'static str {
        match self {
            Color::Black => "\x1b[30m",
            Color::Red => "\x1b[31m",
            Color::Green => "\x1b[32m",
            Color::Yellow => "\x1b[33m",
            Color::Blue => "\x1b[34m",
            Color::Magenta => "\x1b[35m",
            Color::Cyan => "\x1b[36m",
            Color::White => "\x1b[37m",
            Color::Reset => "\x1b[0m",
        }
    }
}

impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "black" => Ok(Color::Black),
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "yellow" => Ok(Color::Yellow),
            "blue" => Ok(Color::Blue),
            "magenta" => Ok(Color::Magenta),
            "cyan" => Ok(Color::Cyan),
            "white" => Ok(Color::White),
            "reset" => Ok(Color::Reset),
            other => Err(anyhow!("unrecognized color keyword: {other}")),
        }
    }
}

/// One run of text in a single color.
///
/// `text` may contain printf-style conversion specifiers (`%s`, `%d`, `%i`;
/// `%%` is a literal percent). Queued `args` are substituted positionally at
/// render time; unsatisfied specifiers render as-is.
#[derive(Debug, Clone)]
pub struct Segment {
    pub color: Color,
    pub text: String,
    pub args: Vec<String>,
}

impl Segment {
    fn pending_args(&self) -> usize {
        specifier_count(&self.text).saturating_sub(self.args.len())
    }

    fn render(&self, out: &mut String) {
        out.push_str(self.color.sgr());
        let mut args = self.args.iter();
        let mut chars = self.text.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }
            match chars.peek() {
                Some(&'%') => {
                    chars.next();
                    out.push('%');
                }
                Some(&spec) if matches!(spec, 's' | 'd' | 'i') => {
                    chars.next();
                    match args.next() {
                        Some(arg) => out.push_str(arg),
                        None => {
                            out.push('%');
                            out.push(spec);
                        }
                    }
                }
                _ => out.push('%'),
            }
        }
    }
}

/// Ordered segments forming one console line.
#[derive(Debug, Clone, Default)]
pub struct Line {
    segments: Vec<Segment>,
}

impl Line {
    pub fn new() -> Self {
        Line::default()
    }

    /// Append a literal segment.
    pub fn push(mut self, color: Color, text: impl Into<String>) -> Self {
        self.segments.push(Segment {
            color,
            text: text.into(),
            args: Vec::new(),
        });
        self
    }

    /// Append a format segment with its positional arguments.
    pub fn pushf<S: Into<String>>(
        mut self,
        color: Color,
        format: impl Into<String>,
        args: impl IntoIterator<Item = S>,
    ) -> Self {
        self.segments.push(Segment {
            color,
            text: format.into(),
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Render all segments, ending with a reset.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            segment.render(&mut out);
        }
        out.push_str(Color::Reset.sgr());
        out
    }

    /// Print the rendered line to stdout with a trailing newline.
    pub fn print(&self) {
        println!("{self}");
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parse a token stream into a [`Line`].
///
/// Color tokens are spelled `@name` (e.g. `@red`, `@reset`); an `@`-prefixed
/// token naming no palette entry is a usage error. A color token flushes the
/// open segment (rendered in the previous color) and switches. A text token
/// containing a conversion specifier extends the open segment's format
/// string; a plain token arriving while the segment still has unconsumed
/// specifiers is queued as a positional argument instead of new text.
pub fn parse_tokens<I, S>(tokens: I) -> Result<Line>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = Line::new();
    let mut current = Color::Reset;
    let mut open: Option<Segment> = None;

    for token in tokens {
        let token = token.as_ref();
        if let Some(name) = token.strip_prefix('@') {
            let color = Color::from_str(name)?;
            if let Some(segment) = open.take() {
                line.segments.push(segment);
            }
            current = color;
            continue;
        }
        match open.as_mut() {
            Some(segment) if segment.pending_args() > 0 => {
                segment.args.push(token.to_string());
            }
            Some(segment) => {
                if !segment.text.is_empty() {
                    segment.text.push(' ');
                }
                segment.text.push_str(token);
            }
            None => {
                open = Some(Segment {
                    color: current,
                    text: token.to_string(),
                    args: Vec::new(),
                });
            }
        }
    }
    if let Some(segment) = open.take() {
        line.segments.push(segment);
    }
    Ok(line)
}

fn specifier_count(text: &str) -> usize {
    let mut count = 0;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            continue;
        }
        match chars.peek() {
            Some(&'%') => {
                chars.next();
            }
            Some(&spec) if matches!(spec, 's' | 'd' | 'i') => {
                chars.next();
                count += 1;
            }
            _ => {}
        }
    }
    count
}
