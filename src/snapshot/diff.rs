//! Diff rendering between a snapshot and fresh output.
//!
//! Every presentation style is derived from the same line-by-line comparison
//! ([`line_pairs`]); styles only change how differences are shown, never
//! whether the unit passed.

use difference::{Changeset, Difference};
use std::fmt::Write as _;
use unicode_width::UnicodeWidthChar;

/// How a snapshot mismatch is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DiffStyle {
    /// `-` / `+` line pairs with unchanged context.
    #[default]
    Unified,
    /// Expected and actual in two truncated columns.
    SideBySide,
    /// One block per differing line, with its line number.
    Annotated,
    /// Only the numbers of the differing lines.
    Minimal,
}

/// One line position in the comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePair<'a> {
    /// 1-based line number.
    pub line: usize,
    pub expected: Option<&'a str>,
    pub actual: Option<&'a str>,
}

impl LinePair<'_> {
    pub fn is_equal(&self) -> bool {
        self.expected == self.actual
    }
}

/// Pairs up lines of `expected` and `actual` by position.
pub fn line_pairs<'a>(expected: &'a str, actual: &'a str) -> Vec<LinePair<'a>> {
    let exp: Vec<&str> = expected.lines().collect();
    let act: Vec<&str> = actual.lines().collect();
    let max = exp.len().max(act.len());
    (0..max)
        .map(|i| LinePair {
            line: i + 1,
            expected: exp.get(i).copied(),
            actual: act.get(i).copied(),
        })
        .collect()
}

/// Renders the differences between `expected` and `actual` in `style`.
///
/// Returns an empty string when the two texts have no differing lines.
pub fn render_diff(expected: &str, actual: &str, style: DiffStyle, width: usize) -> String {
    let pairs = line_pairs(expected, actual);
    if pairs.iter().all(LinePair::is_equal) {
        return String::new();
    }
    match style {
        DiffStyle::Unified => render_unified(expected, actual),
        DiffStyle::SideBySide => render_side_by_side(&pairs, width),
        DiffStyle::Annotated => render_annotated(&pairs),
        DiffStyle::Minimal => render_minimal(&pairs),
    }
}

fn render_unified(expected: &str, actual: &str) -> String {
    let changeset = Changeset::new(expected, actual, "\n");
    let mut out = String::new();
    for diff in &changeset.diffs {
        let (prefix, text) = match diff {
            Difference::Same(x) => (' ', x),
            Difference::Rem(x) => ('-', x),
            Difference::Add(x) => ('+', x),
        };
        for line in text.split('\n') {
            let _ = writeln!(out, "{}{}", prefix, line);
        }
    }
    out
}

fn render_side_by_side(pairs: &[LinePair<'_>], width: usize) -> String {
    let column = (width.saturating_sub(3) / 2).max(8);
    let mut out = String::new();
    for pair in pairs {
        let marker = if pair.is_equal() { ' ' } else { '|' };
        let left = truncate_to_width(pair.expected.unwrap_or(""), column);
        let pad = column.saturating_sub(display_width(&left));
        let right = truncate_to_width(pair.actual.unwrap_or(""), column);
        let _ = writeln!(out, "{}{} {} {}", left, " ".repeat(pad), marker, right);
    }
    out
}

fn render_annotated(pairs: &[LinePair<'_>]) -> String {
    let mut out = String::new();
    for pair in pairs.iter().filter(|p| !p.is_equal()) {
        let _ = writeln!(out, "line {}:", pair.line);
        match pair.expected {
            Some(e) => {
                let _ = writeln!(out, "  expected: {}", e);
            }
            None => out.push_str("  expected: <missing>\n"),
        }
        match pair.actual {
            Some(a) => {
                let _ = writeln!(out, "  actual:   {}", a);
            }
            None => out.push_str("  actual:   <missing>\n"),
        }
    }
    out
}

fn render_minimal(pairs: &[LinePair<'_>]) -> String {
    let lines: Vec<String> = pairs
        .iter()
        .filter(|p| !p.is_equal())
        .map(|p| p.line.to_string())
        .collect();
    format!("{} line(s) differ: {}\n", lines.len(), lines.join(", "))
}

/// Cuts `text` to at most `width` display columns, marking the cut with `…`.
///
/// Tabs and other control characters are shown as single spaces so that
/// every character has a known column width.
fn truncate_to_width(text: &str, width: usize) -> String {
    let printable: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if display_width(&printable) <= width {
        return printable;
    }
    let mut out = String::new();
    let mut used = 0;
    for c in printable.chars() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

fn display_width(text: &str) -> usize {
    text.chars().map(|c| UnicodeWidthChar::width(c).unwrap_or(0)).sum()
}
