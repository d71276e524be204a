//! Incremental `<think>...</think>` splitter.
//!
//! Some reasoning models inline their chain of thought in the content field
//! wrapped in think tags. Chunks may cut a tag in half, so a trailing
//! fragment that could still become a tag is held back until the next
//! chunk decides it.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// A run of visible text or reasoning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkSegment {
    Text(String),
    Thinking(String),
}

#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    in_think: bool,
    /// Drop newlines that directly follow a closing tag
    trim_next_text: bool,
    pending: String,
}

/// Length of the longest proper prefix of `tag` that `s` ends with.
fn partial_tag_len(s: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|k| s.ends_with(&tag[..*k]))
        .unwrap_or(0)
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_think(&self) -> bool {
        self.in_think
    }

    /// Feed one content chunk.
    pub fn push(&mut self, chunk: &str) -> Vec<ThinkSegment> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let tag = if self.in_think { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = self.pending.find(tag) {
                let before: String = self.pending.drain(..pos).collect();
                self.emit(&mut out, before);
                self.pending.drain(..tag.len());
                self.in_think = !self.in_think;
                self.trim_next_text = !self.in_think;
                continue;
            }

            // Tags are ASCII, so the held-back suffix starts on a char boundary.
            let hold = partial_tag_len(&self.pending, tag);
            let flush_to = self.pending.len() - hold;
            let head: String = self.pending.drain(..flush_to).collect();
            self.emit(&mut out, head);
            break;
        }
        out
    }

    /// Flush whatever is held back at end of stream.
    pub fn finish(&mut self) -> Vec<ThinkSegment> {
        let rest = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        self.emit(&mut out, rest);
        self.in_think = false;
        self.trim_next_text = false;
        out
    }

    fn emit(&mut self, out: &mut Vec<ThinkSegment>, mut text: String) {
        if !self.in_think && self.trim_next_text {
            let trimmed = text.trim_start_matches(['\r', '\n']);
            if trimmed.is_empty() {
                return;
            }
            text = trimmed.to_string();
            self.trim_next_text = false;
        }
        if text.is_empty() {
            return;
        }
        match (out.last_mut(), self.in_think) {
            (Some(ThinkSegment::Thinking(prev)), true) | (Some(ThinkSegment::Text(prev)), false) => {
                prev.push_str(&text)
            }
            (_, true) => out.push(ThinkSegment::Thinking(text)),
            (_, false) => out.push(ThinkSegment::Text(text)),
        }
    }
}
