use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};

/// A heading and everything up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownSection {
    /// Heading text, `None` for content before the first heading.
    pub heading: Option<String>,
    pub level: Option<u32>,
    /// Source slice of the section, heading line included.
    pub raw: String,
    /// Text outside the heading with markdown syntax removed.
    pub body: String,
}

impl MarkdownSection {
    pub fn is_heading_only(&self) -> bool {
        self.body.trim().is_empty()
    }
}

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn heading_level(level: HeadingLevel) -> u32 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

struct SectionBuilder {
    start: usize,
    heading: Option<String>,
    level: Option<u32>,
    body: String,
}

impl SectionBuilder {
    fn new(start: usize, level: Option<u32>) -> Self {
        Self {
            start,
            heading: level.map(|_| String::new()),
            level,
            body: String::new(),
        }
    }

    fn finish(self, content: &str, end: usize) -> Option<MarkdownSection> {
        let raw = content[self.start..end].trim();
        if raw.is_empty() {
            return None;
        }
        Some(MarkdownSection {
            heading: self.heading.map(|h| h.trim().to_string()),
            level: self.level,
            raw: raw.to_string(),
            body: self.body.trim().to_string(),
        })
    }
}

/// Split markdown into heading-delimited sections, in source order.
pub fn parse_sections(content: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut current = SectionBuilder::new(0, None);
    let mut in_heading = false;

    for (event, range) in Parser::new_ext(content, parser_options()).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading(level, ..)) => {
                let finished = std::mem::replace(
                    &mut current,
                    SectionBuilder::new(range.start, Some(heading_level(level))),
                );
                sections.extend(finished.finish(content, range.start));
                in_heading = true;
            }
            Event::End(Tag::Heading(..)) => {
                in_heading = false;
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    if let Some(heading) = current.heading.as_mut() {
                        heading.push_str(&text);
                    }
                } else {
                    push_text(&mut current.body, &text);
                }
            }
            Event::SoftBreak | Event::HardBreak if !in_heading => {
                current.body.push('\n');
            }
            Event::End(Tag::Paragraph) | Event::End(Tag::Item) | Event::End(Tag::CodeBlock(_)) => {
                current.body.push('\n');
            }
            _ => {}
        }
    }

    sections.extend(current.finish(content, content.len()));
    sections
}

fn push_text(body: &mut String, text: &str) {
    if !body.is_empty() && !body.ends_with(char::is_whitespace) && !text.starts_with(char::is_whitespace) {
        body.push(' ');
    }
    body.push_str(text);
}

/// All text outside headings with markdown syntax removed. Empty when the
/// document holds nothing but headings, rules and markup.
pub fn body_text(content: &str) -> String {
    parse_sections(content)
        .into_iter()
        .map(|section| section.body)
        .filter(|body| !body.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
