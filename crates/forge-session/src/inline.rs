use forge_core::ToolCallId;
use serde_json::{Map, Value};

/// One inline command parsed out of assistant prose — `spec.md` §4.6's
/// second tool-invocation channel: a bracketed pseudo-XML tag such as
/// `<write_file path="a.txt">new content</write_file>`. The tag name is
/// the tool name; attributes become string-valued input fields;
/// non-whitespace inner text (if any) becomes the `content` field —
/// the same shape `write_file`/`search_replace`/etc. already expect,
/// so an inline command and a structured tool call reach the registry
/// identically.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineCommand {
    pub name: String,
    pub input: Value,
}

/// Scan `text` front-to-back for inline commands, skipping anything
/// inside a fenced code block (a line starting with ` ``` `, toggled
/// until the next such line) — `spec.md` §4.6: "parsed front-to-back
/// and ignored inside fenced code blocks". Malformed tags (no closing
/// `>`, mismatched close tag) are left as plain prose rather than
/// raising an error: an inline command is a best-effort convenience
/// channel, not a strict grammar the model must get exactly right.
///
/// Fence state is tracked per line, but tag matching runs over the
/// whole un-fenced remainder of `text` at once rather than one line at
/// a time — a command's closing tag routinely lands several lines
/// after its open tag (the file-content body of a `write_file`, say),
/// and scoping the scan to a single line would see that as an
/// unclosed, self-closing tag and scatter its real body into prose.
pub fn parse_inline_commands(text: &str) -> Vec<InlineCommand> {
    let mut unfenced = String::with_capacity(text.len());
    let mut fenced = false;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            fenced = !fenced;
            continue;
        }
        if !fenced {
            unfenced.push_str(line);
        }
    }
    parse_tags(&unfenced)
}

fn parse_tags(line: &str) -> Vec<InlineCommand> {
    let mut out = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('<') {
        rest = &rest[open..];
        let Some(close) = rest.find('>') else { break };
        let tag_src = &rest[1..close];
        if tag_src.starts_with('/') || tag_src.is_empty() {
            rest = &rest[close + 1..];
            continue;
        }
        let self_closing = tag_src.ends_with('/');
        let tag_body = tag_src.strip_suffix('/').unwrap_or(tag_src).trim_end();
        let Some((name, attrs)) = split_tag_name(tag_body) else {
            rest = &rest[close + 1..];
            continue;
        };

        let after_open = &rest[close + 1..];
        let (inner, consumed) = if self_closing {
            (None, 0)
        } else {
            let close_tag = format!("</{name}>");
            match after_open.find(close_tag.as_str()) {
                Some(pos) => (Some(&after_open[..pos]), pos + close_tag.len()),
                None => (None, 0),
            }
        };

        let mut fields = Map::new();
        for (key, value) in parse_attributes(attrs) {
            fields.insert(key, Value::String(value));
        }
        if let Some(inner) = inner {
            if !inner.trim().is_empty() {
                fields.insert("content".to_string(), Value::String(inner.to_string()));
            }
        }
        out.push(InlineCommand { name: name.to_string(), input: Value::Object(fields) });

        rest = &after_open[consumed..];
    }
    out
}

fn split_tag_name(tag_body: &str) -> Option<(&str, &str)> {
    let tag_body = tag_body.trim();
    let end = tag_body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(tag_body.len());
    let name = &tag_body[..end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, tag_body[end..].trim_start()))
}

/// Parse `key="value"` pairs out of a tag's attribute substring. Only
/// double-quoted values are recognised, matching the spec's example
/// syntax; anything else is skipped rather than erroring.
fn parse_attributes(attrs: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = attrs;
    loop {
        let rest_trimmed = rest.trim_start();
        let Some(eq) = rest_trimmed.find('=') else { break };
        let key = rest_trimmed[..eq].trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            break;
        }
        let after_eq = rest_trimmed[eq + 1..].trim_start();
        if !after_eq.starts_with('"') {
            break;
        }
        let Some(end_quote) = after_eq[1..].find('"') else { break };
        let value = &after_eq[1..1 + end_quote];
        out.push((key.to_string(), value.to_string()));
        rest = &after_eq[1 + end_quote + 1..];
    }
    out
}

/// Assign turn-unique synthetic ids to inline commands so they can flow
/// through the same tool-call pipeline as model-issued ones — ids are
/// namespaced `inline-N` to stay distinguishable from provider ids in
/// logs and persisted conversation history.
pub fn assign_ids(commands: Vec<InlineCommand>, start: usize) -> Vec<(ToolCallId, String, Value)> {
    commands
        .into_iter()
        .enumerate()
        .map(|(i, cmd)| (ToolCallId(format!("inline-{}", start + i)), cmd.name, cmd.input))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_tag_with_attribute_and_body() {
        let text = r#"Sure, I'll fix that: <write_file path="a.txt">hello\nworld</write_file> done."#;
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "write_file");
        assert_eq!(commands[0].input["path"], "a.txt");
        assert_eq!(commands[0].input["content"], "hello\\nworld");
    }

    #[test]
    fn ignores_tags_inside_fenced_code_blocks() {
        let text = "before\n```\n<write_file path=\"x\">nope</write_file>\n```\nafter <delete_file path=\"y\"/>";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "delete_file");
        assert_eq!(commands[0].input["path"], "y");
    }

    #[test]
    fn self_closing_tag_has_no_content_field() {
        let text = r#"<delete_file path="stale.txt"/>"#;
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].input.get("content").is_none());
    }

    #[test]
    fn multiple_commands_are_returned_in_document_order() {
        let text = r#"<a path="1"/> middle text <b path="2"/>"#;
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name, "a");
        assert_eq!(commands[1].name, "b");
    }

    #[test]
    fn unclosed_tag_is_left_as_prose() {
        let text = "this has a < that never closes";
        assert!(parse_inline_commands(text).is_empty());
    }

    #[test]
    fn parses_a_tag_whose_body_spans_multiple_lines() {
        let text = "I'll write the file:\n<write_file path=\"a.txt\">line one\nline two\nline three</write_file>\ndone.";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "write_file");
        assert_eq!(commands[0].input["path"], "a.txt");
        assert_eq!(commands[0].input["content"], "line one\nline two\nline three");
    }

    #[test]
    fn multiple_multiline_commands_stay_in_document_order() {
        let text = "<a path=\"1\">\nfirst\nbody\n</a>\nmiddle\n<b path=\"2\">\nsecond\nbody\n</b>";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name, "a");
        assert_eq!(commands[0].input["content"], "\nfirst\nbody\n");
        assert_eq!(commands[1].name, "b");
        assert_eq!(commands[1].input["content"], "\nsecond\nbody\n");
    }

    #[test]
    fn multiline_body_inside_a_fenced_block_is_still_ignored() {
        let text = "before\n```\n<write_file path=\"x\">\nnope\nstill nope\n</write_file>\n```\nafter <delete_file path=\"y\"/>";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "delete_file");
    }
}
