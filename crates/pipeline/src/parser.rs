//! Turns rewritten backend text into [`GeneratedUnit`]s.
//!
//! The backend is asked for blocks headed `EMAIL 1`, `EMAIL 2`, ... (or
//! `POST n` for social kinds), each carrying labelled fields:
//!
//! ```text
//! === EMAIL 2 ===
//! Purpose: Share the origin story
//! Send Day: 3
//! Subject Lines:
//! 1. How this started
//! 2. The day I almost quit
//! Body:
//! Hi there, ...
//! CTA: Reply with your own story
//! ```
//!
//! Matching is deliberately loose: header decoration, markdown emphasis around
//! labels and several label spellings are accepted. A block that yields some
//! fields but no body still becomes a unit (with an empty body); parsing fails
//! only when no unit at all can be extracted.

use std::sync::LazyLock;

use regex::Regex;

use crate::{ContentKind, DetectionScore, GeneratedUnit, ParseError, UnitId};

static EMAIL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:[#=*_>\-][ \t]*)*(?:email|message)[ \t]*#?[ \t]*(\d{1,3})\b.*$")
        .expect("static regex")
});

static POST_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:[#=*_>\-][ \t]*)*post[ \t]*#?[ \t]*(\d{1,3})\b.*$")
        .expect("static regex")
});

static FIELD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*•]\s+)?[*_]*\s*(purpose|goal|send[\s_-]*day|send[\s_-]*on|timing|day|subject(?:[\s_-]*lines?)?(?:\s*#?(?:\d+|[a-e]))?|hook|body|content|copy|cta|call[\s_-]*to[\s_-]*action)\s*[*_]*\s*[:：]\s*[*_]*\s*(.*?)\s*[*_]*\s*$",
    )
    .expect("static regex")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[a-eA-E][.)]|[-*•])\s+(.+?)\s*$").expect("static regex")
});

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

/// Parses `raw` produced for `kind` into units ordered by sequence position.
pub fn parse_units(raw: &str, kind: ContentKind) -> Result<Vec<GeneratedUnit>, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyInput { kind });
    }

    let mut units: Vec<GeneratedUnit> = split_blocks(raw, kind)
        .into_iter()
        .enumerate()
        .filter_map(|(index, block)| {
            let ordinal = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let fields = BlockFields::extract(block.text);
            if !block.delimited && !fields.has_any() {
                return None;
            }
            if block.delimited && fields.is_blank() {
                return None;
            }
            Some(fields.into_unit(block.number.unwrap_or(ordinal)))
        })
        .collect();

    if units.is_empty() {
        return Err(ParseError::NoUnits { kind });
    }
    units.sort_by_key(|u| u.sequence_position);
    Ok(units)
}

// ---------------------------------------------------------------------------
// Block splitting
// ---------------------------------------------------------------------------

struct Block<'a> {
    number: Option<u32>,
    text: &'a str,
    delimited: bool,
}

fn header_pattern(kind: ContentKind) -> &'static Regex {
    match kind {
        ContentKind::SocialCampaign => &POST_HEADER,
        _ => &EMAIL_HEADER,
    }
}

/// Splits on header lines. Text before the first header is dropped; with no
/// headers at all the whole input is one undelimited block.
fn split_blocks(raw: &str, kind: ContentKind) -> Vec<Block<'_>> {
    let headers: Vec<(usize, usize, Option<u32>)> = header_pattern(kind)
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1).and_then(|m| m.as_str().parse().ok());
            Some((whole.start(), whole.end(), number))
        })
        .collect();

    if headers.is_empty() {
        return vec![Block {
            number: None,
            text: raw,
            delimited: false,
        }];
    }

    headers
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start, number))| {
            let body_end = headers.get(i + 1).map_or(raw.len(), |next| next.0);
            Block {
                number,
                text: &raw[body_start..body_end],
                delimited: true,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Purpose,
    SendDay,
    Subject,
    Body,
    Cta,
}

impl Label {
    /// Maps a matched label to a field, plus whether the spelling is explicit
    /// enough to end a body section (`Day:` inside a body is usually prose).
    fn classify(raw: &str) -> (Label, bool) {
        let lower = raw.to_ascii_lowercase();
        let compact: String = lower.chars().filter(char::is_ascii_alphanumeric).collect();
        if compact == "purpose" {
            (Label::Purpose, true)
        } else if compact == "goal" {
            (Label::Purpose, false)
        } else if compact.starts_with("sendday") || compact.starts_with("sendon") {
            (Label::SendDay, true)
        } else if compact == "day" || compact == "timing" {
            (Label::SendDay, false)
        } else if compact.starts_with("subject") {
            (Label::Subject, true)
        } else if compact == "hook" {
            (Label::Subject, false)
        } else if compact == "cta" || compact == "calltoaction" {
            (Label::Cta, true)
        } else {
            (Label::Body, compact == "body")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Subjects,
    Body,
    Cta,
}

#[derive(Debug, Default)]
struct BlockFields {
    purpose: Option<String>,
    send_day: Option<u32>,
    subjects: Vec<String>,
    body_lines: Vec<String>,
    saw_body_label: bool,
    loose_lines: Vec<String>,
    cta: Option<String>,
}

impl BlockFields {
    fn extract(text: &str) -> Self {
        let mut fields = BlockFields::default();
        let mut section = Section::None;

        for line in text.lines() {
            if let Some(caps) = FIELD_LABEL.captures(line) {
                let raw_label = caps.get(1).map_or("", |m| m.as_str());
                let value = clean_value(caps.get(2).map_or("", |m| m.as_str()));
                let (label, explicit) = Label::classify(raw_label);

                let stays_in_body = section == Section::Body && !explicit;
                if !stays_in_body {
                    section = fields.apply_label(label, value);
                    continue;
                }
            }

            let trimmed = line.trim();
            match section {
                Section::Body => fields.body_lines.push(line.trim_end().to_string()),
                Section::Subjects => {
                    if trimmed.is_empty() {
                        if !fields.subjects.is_empty() {
                            section = Section::None;
                        }
                    } else {
                        let item = LIST_ITEM
                            .captures(line)
                            .and_then(|c| c.get(1))
                            .map_or(trimmed, |m| m.as_str());
                        push_subject(&mut fields.subjects, item);
                    }
                }
                Section::Cta => {
                    if !trimmed.is_empty() {
                        fields.cta = Some(clean_value(trimmed));
                        section = Section::None;
                    }
                }
                Section::None => {
                    if !trimmed.is_empty() && !is_separator(trimmed) {
                        fields.loose_lines.push(line.trim_end().to_string());
                    }
                }
            }
        }
        fields
    }

    fn apply_label(&mut self, label: Label, value: String) -> Section {
        match label {
            Label::Purpose => {
                if !value.is_empty() {
                    self.purpose = Some(value);
                }
                Section::None
            }
            Label::SendDay => {
                if let Some(day) = parse_day(&value) {
                    self.send_day = Some(day);
                }
                Section::None
            }
            Label::Subject => {
                if value.is_empty() {
                    Section::Subjects
                } else {
                    push_subject(&mut self.subjects, &value);
                    Section::None
                }
            }
            Label::Body => {
                self.saw_body_label = true;
                if !value.is_empty() {
                    self.body_lines.push(value);
                }
                Section::Body
            }
            Label::Cta => {
                if value.is_empty() {
                    Section::Cta
                } else {
                    self.cta = Some(value);
                    Section::None
                }
            }
        }
    }

    fn body(&self) -> String {
        let lines = if self.saw_body_label {
            &self.body_lines
        } else {
            &self.loose_lines
        };
        let mut end = lines.len();
        while end > 0 && is_separator(lines[end - 1].trim()) {
            end -= 1;
        }
        lines[..end].join("\n").trim().to_string()
    }

    /// Any labelled field was found.
    fn has_any(&self) -> bool {
        self.purpose.is_some()
            || self.send_day.is_some()
            || !self.subjects.is_empty()
            || self.saw_body_label
            || self.cta.is_some()
    }

    /// Nothing at all, labelled or not.
    fn is_blank(&self) -> bool {
        !self.has_any() && self.loose_lines.is_empty()
    }

    fn into_unit(self, sequence_position: u32) -> GeneratedUnit {
        let body = self.body();
        GeneratedUnit {
            id: UnitId::new_random(),
            sequence_position,
            purpose: self.purpose.unwrap_or_default(),
            subject_variants: self.subjects,
            body,
            call_to_action: self.cta,
            schedule_offset_days: self.send_day.unwrap_or(0),
            detection_score: DetectionScore::zero(),
        }
    }
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '*' || c == '_')
        .trim()
        .to_string()
}

fn push_subject(subjects: &mut Vec<String>, raw: &str) {
    let cleaned = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '*' | '_'))
        .trim();
    if !cleaned.is_empty() && !subjects.iter().any(|s| s == cleaned) {
        subjects.push(cleaned.to_string());
    }
}

fn parse_day(value: &str) -> Option<u32> {
    if let Some(m) = FIRST_NUMBER.find(value) {
        return m.as_str().parse().ok();
    }
    let lower = value.to_ascii_lowercase();
    if lower.contains("immediate") || lower.contains("same day") || lower.contains("signup") {
        Some(0)
    } else {
        None
    }
}

fn is_separator(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| matches!(c, '-' | '=' | '*' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_EMAILS: &str = "\
Here is your sequence.

=== EMAIL 1 ===
Purpose: Welcome and set expectations
Send Day: 0
Subject Lines:
1. Welcome aboard
2. \"You're in\"
3. What happens next
Body:
Hi there,

Thanks for joining. Here's what to expect.
CTA: Reply and say hello

=== EMAIL 2 ===
**Purpose:** Tell the origin story
**Send Day:** Day 3
**Subject Line A:** How this started
**Subject Line B:** The day I almost quit
**Body:**
It was a Tuesday.
Day 1: nothing worked.
---
**Call to Action:** Read the full story

=== EMAIL 3 ===
Purpose: Soft pitch
Send Day: 7
Subject: A small offer
";

    #[test]
    fn parses_labelled_blocks_in_order() {
        let units = parse_units(THREE_EMAILS, ContentKind::WelcomeSequence).unwrap();
        assert_eq!(units.len(), 3);

        let first = &units[0];
        assert_eq!(first.sequence_position, 1);
        assert_eq!(first.purpose, "Welcome and set expectations");
        assert_eq!(first.schedule_offset_days, 0);
        assert_eq!(
            first.subject_variants,
            vec!["Welcome aboard", "You're in", "What happens next"]
        );
        assert_eq!(
            first.body,
            "Hi there,\n\nThanks for joining. Here's what to expect."
        );
        assert_eq!(first.call_to_action.as_deref(), Some("Reply and say hello"));
    }

    #[test]
    fn tolerates_markdown_and_keeps_day_prose_in_body() {
        let units = parse_units(THREE_EMAILS, ContentKind::WelcomeSequence).unwrap();
        let second = &units[1];
        assert_eq!(second.purpose, "Tell the origin story");
        assert_eq!(second.schedule_offset_days, 3);
        assert_eq!(
            second.subject_variants,
            vec!["How this started", "The day I almost quit"]
        );
        assert_eq!(second.body, "It was a Tuesday.\nDay 1: nothing worked.");
        assert_eq!(second.call_to_action.as_deref(), Some("Read the full story"));
    }

    #[test]
    fn block_without_body_still_yields_unit() {
        let units = parse_units(THREE_EMAILS, ContentKind::WelcomeSequence).unwrap();
        let third = &units[2];
        assert_eq!(third.body, "");
        assert_eq!(third.detection_score, DetectionScore::zero());
        assert_eq!(third.subject_variants, vec!["A small offer"]);
        assert_eq!(third.schedule_offset_days, 7);
    }

    #[test]
    fn units_sorted_by_header_number() {
        let raw = "EMAIL 2\nBody: second\n\nEMAIL 1\nBody: first\n";
        let units = parse_units(raw, ContentKind::NurtureSequence).unwrap();
        assert_eq!(units[0].body, "first");
        assert_eq!(units[1].body, "second");
    }

    #[test]
    fn header_variants_are_recognised() {
        let raw = "## Email 1: Welcome\nBody: a\n\n**EMAIL #2**\nBody: b\n\n--- Message 3 ---\nBody: c\n";
        let units = parse_units(raw, ContentKind::LaunchSequence).unwrap();
        let positions: Vec<u32> = units.iter().map(|u| u.sequence_position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn unlabelled_block_text_becomes_body() {
        let raw = "EMAIL 1\nJust some prose\nwith two lines\n";
        let units = parse_units(raw, ContentKind::SalesSequence).unwrap();
        assert_eq!(units[0].body, "Just some prose\nwith two lines");
    }

    #[test]
    fn social_kind_splits_on_post_headers() {
        let raw = "POST 1\nHook: Stop scrolling\nBody: Post one\n\nPOST 2\nBody: Post two\n";
        let units = parse_units(raw, ContentKind::SocialCampaign).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].subject_variants, vec!["Stop scrolling"]);
    }

    #[test]
    fn undelimited_labelled_text_is_one_unit() {
        let raw = "Purpose: Single note\nBody: Hello";
        let units = parse_units(raw, ContentKind::NurtureSequence).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].sequence_position, 1);
    }

    #[test]
    fn unstructured_text_is_a_parse_error() {
        let err = parse_units("I'm sorry, I can't help with that.", ContentKind::WelcomeSequence)
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::NoUnits {
                kind: ContentKind::WelcomeSequence
            }
        );
    }

    #[test]
    fn whitespace_is_empty_input() {
        assert_eq!(
            parse_units("  \n ", ContentKind::SalesSequence).unwrap_err(),
            ParseError::EmptyInput {
                kind: ContentKind::SalesSequence
            }
        );
    }

    #[test]
    fn send_day_words_map_to_zero() {
        assert_eq!(parse_day("Immediately after signup"), Some(0));
        assert_eq!(parse_day("Day 12"), Some(12));
        assert_eq!(parse_day("whenever"), None);
    }
}
