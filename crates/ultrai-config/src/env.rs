use std::sync::OnceLock;

use regex::Regex;

/// Placeholder pattern: `{{ env.VAR }}` with an optional
/// `| default("fallback")` clause
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("must be valid regex")
    })
}

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// Runs before deserialization so config structs hold plain strings.
/// A missing variable is an error unless the placeholder carries a
/// `default("…")` clause. TOML comment lines pass through unexpanded.
///
/// # Errors
///
/// Returns the name of the first referenced variable that is unset and
/// has no default.
pub fn expand_env(input: &str) -> anyhow::Result<String> {
    let mut output = String::with_capacity(input.len());

    for (index, line) in input.lines().enumerate() {
        if index > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut cursor = 0;
        for captures in placeholder_re().captures_iter(line) {
            let span = captures.get(0).expect("capture 0 always present");
            let var = &captures[1];

            output.push_str(&line[cursor..span.start()]);

            match std::env::var(var) {
                Ok(value) => output.push_str(&value),
                Err(_) => match captures.get(2) {
                    Some(default) => output.push_str(default.as_str()),
                    None => anyhow::bail!("environment variable not found: `{var}`"),
                },
            }

            cursor = span.end();
        }
        output.push_str(&line[cursor..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}
