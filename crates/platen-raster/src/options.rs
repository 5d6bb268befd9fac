// SPDX-License-Identifier: Apache-2.0
//
// Job options: the name=value bag assembled from `IPP_*` environment
// variables and `-o` command-line arguments.

/// Ordered name=value option bag; later values replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Options(Vec<(String, String)>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Load options from every `IPP_*` environment variable.
    ///
    /// `IPP_MEDIA_COL` becomes `media-col`: the prefix is dropped, the rest
    /// is lowercased and underscores become hyphens.
    pub fn load_env(&mut self) {
        for (key, value) in std::env::vars() {
            let Some(raw) = key.strip_prefix("IPP_") else {
                continue;
            };
            let name: String = raw
                .chars()
                .map(|c| {
                    if c == '_' {
                        '-'
                    } else {
                        c.to_ascii_lowercase()
                    }
                })
                .collect();
            self.add(name, value);
        }
    }

    /// Parse a `"name=value name=value ..."` string into the bag.
    ///
    /// Values may be quoted (`'...'` or `"..."`) or wrapped in braces
    /// (`{...}`, nesting allowed) for collection values.
    pub fn parse(&mut self, text: &str) {
        let mut chars = text.chars().peekable();

        loop {
            // Skip whitespace between options.
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '=' {
                    break;
                }
                if c.is_whitespace() {
                    break;
                }
                name.push(c);
            }
            if name.is_empty() {
                continue;
            }

            let mut value = String::new();
            match chars.peek() {
                Some('{') => {
                    // Balanced-brace value, braces kept.
                    let mut depth = 0usize;
                    for c in chars.by_ref() {
                        value.push(c);
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Some(quote @ ('\'' | '"')) => {
                    let quote = *quote;
                    chars.next();
                    for c in chars.by_ref() {
                        if c == quote {
                            break;
                        }
                        value.push(c);
                    }
                }
                _ => {
                    while let Some(c) = chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        value.push(*c);
                        chars.next();
                    }
                }
            }

            self.add(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_options() {
        let mut options = Options::new();
        options.parse("copies=2 sides=two-sided-long-edge print-quality=4");
        assert_eq!(options.get("copies"), Some("2"));
        assert_eq!(options.get("sides"), Some("two-sided-long-edge"));
        assert_eq!(options.get("print-quality"), Some("4"));
        assert_eq!(options.get("missing"), None);
    }

    #[test]
    fn parse_quoted_value() {
        let mut options = Options::new();
        options.parse(r#"job-name='My Print Job' media=na_letter_8.5x11in"#);
        assert_eq!(options.get("job-name"), Some("My Print Job"));
        assert_eq!(options.get("media"), Some("na_letter_8.5x11in"));
    }

    #[test]
    fn parse_braced_collection_value() {
        let mut options = Options::new();
        options.parse("media-col={media-size={x-dimension=21590 y-dimension=27940}} copies=1");
        assert_eq!(
            options.get("media-col"),
            Some("{media-size={x-dimension=21590 y-dimension=27940}}")
        );
        assert_eq!(options.get("copies"), Some("1"));
    }

    #[test]
    fn later_value_wins() {
        let mut options = Options::new();
        options.parse("copies=1 copies=3");
        assert_eq!(options.get("copies"), Some("3"));
    }
}
