// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Parser for the Prometheus text exposition format (version 0.0.4).

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Milliseconds since the epoch, when the exposition carries one
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exposition {
    /// Distinct metric families, in order of first appearance
    pub families: Vec<String>,
    pub samples: Vec<PromSample>,
}

/// Suffixes under which histogram and summary samples are exposed
const FAMILY_SUFFIXES: [&str; 6] = ["_bucket", "_sum", "_count", "_total", "_created", "_info"];

impl Exposition {
    fn family_for(&mut self, declared: Option<&str>, sample: &str) -> String {
        let family = match declared {
            Some(family)
                if sample == family
                    || FAMILY_SUFFIXES
                        .iter()
                        .any(|suffix| sample.strip_suffix(suffix) == Some(family)) =>
            {
                family.to_string()
            }
            _ => sample.to_string(),
        };
        self.note_family(&family);
        family
    }

    fn note_family(&mut self, family: &str) {
        if !self.families.iter().any(|f| f == family) {
            self.families.push(family.to_string());
        }
    }
}

/// Parses a full exposition. Any malformed sample line fails the whole parse.
pub fn parse(text: &str) -> Result<Exposition, ParseError> {
    let mut exposition = Exposition::default();
    let mut declared: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.split_whitespace();
            if let (Some("HELP" | "TYPE"), Some(name)) = (parts.next(), parts.next()) {
                exposition.note_family(name);
                declared = Some(name.to_string());
            }
            continue;
        }

        let sample = parse_sample(line).map_err(|message| ParseError {
            line: idx + 1,
            message,
        })?;
        exposition.family_for(declared.as_deref(), &sample.name);
        exposition.samples.push(sample);
    }
    Ok(exposition)
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn parse_sample(line: &str) -> Result<PromSample, String> {
    let name_end = line
        .char_indices()
        .find(|&(i, c)| if i == 0 { !is_name_start(c) } else { !is_name_char(c) })
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    if name_end == 0 {
        return Err(format!("invalid metric name in '{line}'"));
    }
    let name = line[..name_end].to_string();
    let mut rest = &line[name_end..];

    let mut labels = BTreeMap::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let (parsed, remaining) = parse_labels(after_brace)?;
        labels = parsed;
        rest = remaining;
    }

    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| format!("missing value for '{name}'"))
        .and_then(parse_value)?;
    let timestamp_ms = fields
        .next()
        .map(|ts| {
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp '{ts}'"))
        })
        .transpose()?;
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected trailing '{extra}'"));
    }

    Ok(PromSample {
        name,
        labels,
        value,
        timestamp_ms,
    })
}

/// Parses `k="v",...}` and returns the labels and what follows the closing brace
fn parse_labels(input: &str) -> Result<(BTreeMap<String, String>, &str), String> {
    let mut labels = BTreeMap::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches([' ', ',']);
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| format!("label without value in '{input}'"))?;
        let key = rest[..eq].trim();
        if key.is_empty() || !key.chars().all(is_name_char) {
            return Err(format!("invalid label name '{key}'"));
        }
        rest = rest[eq + 1..].trim_start();
        let quoted = rest
            .strip_prefix('"')
            .ok_or_else(|| format!("label '{key}' is not quoted"))?;

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let consumed = loop {
            match chars.next() {
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err(format!("unterminated escape in label '{key}'")),
                },
                Some((i, '"')) => break i + 1,
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label '{key}'")),
            }
        };
        labels.insert(key.to_string(), value);
        rest = &quoted[consumed..];
    }
}

fn parse_value(raw: &str) -> Result<f64, String> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => raw
            .parse::<f64>()
            .map_err(|_| format!("invalid value '{raw}'")),
    }
}
