//! Deterministic formatting of the synthesis text
//!
//! A pure function: no model call, no randomness. Normalizes bullet
//! markers, collapses blank-line runs, and ensures the text opens with a
//! heading so clients can render it directly.

/// Render the raw synthesis as presentable markdown
#[must_use]
pub fn format_synthesis(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0_usize;

    for line in trimmed.lines() {
        let line = line.trim_end();

        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                lines.push(String::new());
            }
            continue;
        }
        blank_run = 0;

        lines.push(normalize_bullet(line));
    }

    let body = lines.join("\n");
    if body.starts_with('#') {
        body
    } else {
        format!("# Ultra Synthesis\n\n{body}")
    }
}

/// Rewrite `*` and `+` bullet markers as `-`, preserving indentation
fn normalize_bullet(line: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);

    if let Some(item) = rest.strip_prefix("* ").or_else(|| rest.strip_prefix("+ ")) {
        format!("{indent}- {item}")
    } else {
        line.to_owned()
    }
}
