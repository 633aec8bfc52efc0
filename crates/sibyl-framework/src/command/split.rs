/// Splits a command line into whitespace-separated tokens.
///
/// Handles:
/// - Any run of whitespace as a separator
/// - Double-quoted runs, which become a single token (quotes removed)
/// - An unterminated quote, which absorbs the rest of the input
///
/// Single quotes are ordinary characters, so chat text such as `don't`
/// survives intact.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    // Set once a quote opened in this token, so `""` yields an empty argument.
    let mut quoted = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quote = !in_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

/// Joins tokens back into a line that [`tokenize`] splits the same way.
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(tokenize("echo hello world"), vec!["echo", "hello", "world"]);
        assert_eq!(tokenize("echo"), vec!["echo"]);
    }

    #[test]
    fn test_tokenize_quoted() {
        assert_eq!(tokenize(r#"echo "a b" c"#), vec!["echo", "a b", "c"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote_absorbs_rest() {
        assert_eq!(tokenize(r#"echo "a b"#), vec!["echo", "a b"]);
        assert_eq!(tokenize(r#"say "one  two   three"#), vec!["say", "one  two   three"]);
    }

    #[test]
    fn test_tokenize_single_quote_is_literal() {
        assert_eq!(tokenize("say don't stop"), vec!["say", "don't", "stop"]);
    }

    #[test]
    fn test_tokenize_empty_quotes() {
        assert_eq!(tokenize(r#"set key """#), vec!["set", "key", ""]);
    }

    #[test]
    fn test_tokenize_whitespace_only() {
        assert!(tokenize("   \t  ").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_join_args_reverses_tokenize() {
        let args = vec!["echo", "a b", "", "c"];
        let line = join_args(&args);
        assert_eq!(line, r#"echo "a b" "" c"#);
        assert_eq!(tokenize(&line), args);
    }
}
