/*!
 * Logstash-style string interpolation
 *
 * Supported placeholders:
 *
 * - `%{field}` and `%{[a][b]}`: the value of a field reference; strings are
 *   inserted verbatim, other values as compact JSON
 * - `%{+FORMAT}`: the event timestamp formatted with a Joda-style pattern
 *   (`YYYY yyyy YY MM dd HH mm ss SSS`, quoted literals with `'...'`)
 * - `%{+%s}`: the event timestamp as epoch seconds
 *
 * A field that the event does not carry leaves its placeholder in the
 * output unchanged.
 */

use crate::event::{parse_field_ref, Event};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([^}]+)\}").expect("valid placeholder pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field { reference: String, raw: String },
    EpochSeconds,
    Time { format: String, raw: String },
}

/// Compiled interpolation template
#[derive(Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Part::Literal(source[last..whole.start()].to_string()));
            }

            let inner = inner.as_str();
            let part = match inner.strip_prefix('+') {
                Some("%s") => Part::EpochSeconds,
                Some(pattern) => Part::Time {
                    format: joda_to_strftime(pattern),
                    raw: whole.as_str().to_string(),
                },
                None => Part::Field {
                    reference: inner.to_string(),
                    raw: whole.as_str().to_string(),
                },
            };
            parts.push(part);
            last = whole.end();
        }
        if last < source.len() {
            parts.push(Part::Literal(source[last..].to_string()));
        }

        Self {
            source: source.to_string(),
            parts,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the template interpolates `field_ref`
    ///
    /// Compares normalized references, so `%{message}` and `%{[message]}`
    /// both reference `message`.
    pub fn references(&self, field_ref: &str) -> bool {
        let wanted = parse_field_ref(field_ref);
        self.parts.iter().any(|part| match part {
            Part::Field { reference, .. } => parse_field_ref(reference) == wanted,
            _ => false,
        })
    }

    /// True if the template has no placeholders
    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub fn render(&self, event: &Event) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field { reference, raw } => match event.get(reference) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(Value::Null) | None => out.push_str(raw),
                    Some(other) => out.push_str(&other.to_string()),
                },
                Part::EpochSeconds => out.push_str(&event.timestamp().timestamp().to_string()),
                Part::Time { format, raw } => {
                    out.push_str(&render_time(event.timestamp(), format, raw))
                }
            }
        }
        out
    }
}

/// Format `timestamp` with a strftime pattern; an unformattable pattern
/// leaves the placeholder text in place
fn render_time(timestamp: DateTime<Utc>, format: &str, raw: &str) -> String {
    use fmt::Write;
    let mut rendered = String::new();
    match write!(rendered, "{}", timestamp.format(format)) {
        Ok(()) => rendered,
        Err(_) => raw.to_string(),
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Template").field(&self.source).finish()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Translate a Joda-style date pattern into a chrono strftime string
///
/// Unknown letters are copied literally.
fn joda_to_strftime(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // Quoted literal; '' is an escaped quote
            let mut j = i + 1;
            if j < chars.len() && chars[j] == '\'' {
                out.push('\'');
                i = j + 1;
                continue;
            }
            while j < chars.len() && chars[j] != '\'' {
                push_literal(&mut out, chars[j]);
                j += 1;
            }
            i = j + 1;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let directive = match (c, run) {
            ('Y' | 'y', 2) => Some("%y"),
            ('Y' | 'y', _) => Some("%Y"),
            ('M', 1 | 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', _) => Some("%d"),
            ('H', _) => Some("%H"),
            ('h', _) => Some("%I"),
            ('m', _) => Some("%M"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('Z', _) => Some("%z"),
            _ => None,
        };

        match directive {
            Some(s) => out.push_str(s),
            None => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
            }
        }
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
