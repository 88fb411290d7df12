//! Line-level diff encoding with a character-level micro-diff for small
//! replacements, so the gate can send what changed instead of a full
//! re-transcription on every tick.

use similar::{capture_diff_slices, Algorithm, DiffTag};

const CONTENT_TRUNCATE: usize = 200;
const SUMMARY_CAP: usize = 500;
const CONTEXT_LINES: usize = 1;
const MICRO_DIFF_SIDE_CAP: usize = 100;
const MAX_MICRO_OPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Initial,
    Add,
    Remove,
    Modify,
}

impl DeltaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::Initial => "initial",
            DeltaKind::Add => "add",
            DeltaKind::Remove => "remove",
            DeltaKind::Modify => "modify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub kind: DeltaKind,
    pub location: String,
    pub content: String,
    pub context: String,
}

/// Tracks the previous OCR text and emits deltas against it on each call.
pub struct DeltaEncoder {
    context_lines: usize,
    last_text: String,
    last_lines: Vec<String>,
}

impl Default for DeltaEncoder {
    fn default() -> Self {
        Self::new(CONTEXT_LINES)
    }
}

impl DeltaEncoder {
    pub fn new(context_lines: usize) -> Self {
        Self {
            context_lines,
            last_text: String::new(),
            last_lines: Vec::new(),
        }
    }

    pub fn encode(&mut self, current_text: &str) -> Vec<TextDelta> {
        if self.last_text.is_empty() {
            self.last_text = current_text.to_string();
            self.last_lines = current_text.split('\n').map(str::to_string).collect();
            return vec![TextDelta {
                kind: DeltaKind::Initial,
                location: "full".to_string(),
                content: summarize(current_text),
                context: String::new(),
            }];
        }

        let current_lines: Vec<&str> = current_text.split('\n').collect();
        let last_refs: Vec<&str> = self.last_lines.iter().map(String::as_str).collect();
        let ops = capture_diff_slices(Algorithm::Myers, &last_refs, &current_lines);

        let mut deltas = Vec::new();
        for op in ops {
            let old_range = op.old_range();
            let new_range = op.new_range();
            match op.tag() {
                DiffTag::Equal => continue,
                DiffTag::Insert => {
                    let content = current_lines[new_range.clone()].join("\n");
                    deltas.push(TextDelta {
                        kind: DeltaKind::Add,
                        location: format!("line {}", new_range.start + 1),
                        content: truncate(&content, CONTENT_TRUNCATE),
                        context: context_block(&current_lines, new_range.clone(), self.context_lines),
                    });
                }
                DiffTag::Delete => {
                    let content = self.last_lines[old_range.clone()].join("\n");
                    deltas.push(TextDelta {
                        kind: DeltaKind::Remove,
                        location: format!("line {}", old_range.start + 1),
                        content: truncate(&content, CONTENT_TRUNCATE),
                        context: String::new(),
                    });
                }
                DiffTag::Replace => {
                    let old_content = self.last_lines[old_range.clone()].join("\n");
                    let new_content = current_lines[new_range.clone()].join("\n");
                    let content = if old_content.len() < MICRO_DIFF_SIDE_CAP && new_content.len() < MICRO_DIFF_SIDE_CAP {
                        describe_change(&old_content, &new_content)
                    } else {
                        truncate(&new_content, CONTENT_TRUNCATE)
                    };
                    deltas.push(TextDelta {
                        kind: DeltaKind::Modify,
                        location: format!("line {}", old_range.start + 1),
                        content,
                        context: context_block(&current_lines, new_range.clone(), self.context_lines),
                    });
                }
            }
        }

        self.last_text = current_text.to_string();
        self.last_lines = current_lines.into_iter().map(str::to_string).collect();
        deltas
    }

    pub fn reset(&mut self) {
        self.last_text.clear();
        self.last_lines.clear();
    }

    pub fn last_text_len(&self) -> usize {
        self.last_text.len()
    }
}

fn summarize(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let summary = if lines.len() <= 5 {
        text.to_string()
    } else {
        format!(
            "{}\n... ({} lines total) ...\n{}",
            lines[..3].join("\n"),
            lines.len(),
            lines[lines.len() - 2..].join("\n")
        )
    };
    truncate(&summary, SUMMARY_CAP)
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

fn context_block(lines: &[&str], range: std::ops::Range<usize>, context_lines: usize) -> String {
    let start = range.start.saturating_sub(context_lines);
    let end = (range.end + context_lines).min(lines.len());

    (start..end)
        .map(|i| {
            let marker = if range.contains(&i) { ">" } else { " " };
            format!("{marker} {}", lines[i])
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Character-level diff for small replacements, rendered as up to three
/// `added`/`removed`/`changed` clauses joined by `"; "`.
fn describe_change(old: &str, new: &str) -> String {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let ops = capture_diff_slices(Algorithm::Myers, &old_chars, &new_chars);

    let mut changes = Vec::new();
    for op in ops {
        if changes.len() >= MAX_MICRO_OPS {
            break;
        }
        let old_range = op.old_range();
        let new_range = op.new_range();
        match op.tag() {
            DiffTag::Equal => continue,
            DiffTag::Insert => {
                let added: String = new_chars[new_range].iter().collect();
                changes.push(format!("added `{added}`"));
            }
            DiffTag::Delete => {
                let removed: String = old_chars[old_range].iter().collect();
                changes.push(format!("removed `{removed}`"));
            }
            DiffTag::Replace => {
                let removed: String = old_chars[old_range].iter().collect();
                let added: String = new_chars[new_range].iter().collect();
                changes.push(format!("changed `{removed}` to `{added}`"));
            }
        }
    }

    if changes.is_empty() {
        new.to_string()
    } else {
        changes.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_emits_an_initial_summary() {
        let mut encoder = DeltaEncoder::default();
        let deltas = encoder.encode("one\ntwo\nthree");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Initial);
        assert_eq!(deltas[0].location, "full");
    }

    #[test]
    fn repeating_the_same_text_yields_no_deltas() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode("alpha\nbeta");
        let deltas = encoder.encode("alpha\nbeta");
        assert!(deltas.is_empty());
    }

    #[test]
    fn an_appended_line_is_reported_as_an_insert() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode("alpha");
        let deltas = encoder.encode("alpha\nbeta");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Add);
        assert_eq!(deltas[0].content, "beta");
    }

    #[test]
    fn a_small_replacement_gets_a_character_level_description() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode("hello world");
        let deltas = encoder.encode("hello there");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Modify);
        assert!(deltas[0].content.contains("world") || deltas[0].content.contains("there"));
    }

    #[test]
    fn reset_clears_history_so_the_next_call_is_initial_again() {
        let mut encoder = DeltaEncoder::default();
        encoder.encode("alpha");
        encoder.reset();
        let deltas = encoder.encode("alpha");
        assert_eq!(deltas[0].kind, DeltaKind::Initial);
    }

    #[test]
    fn long_text_is_summarized_with_head_and_tail() {
        let mut encoder = DeltaEncoder::default();
        let text = (1..=10).map(|n| format!("line{n}")).collect::<Vec<_>>().join("\n");
        let deltas = encoder.encode(&text);
        assert!(deltas[0].content.contains("10 lines total"));
    }
}
