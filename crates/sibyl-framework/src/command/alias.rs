//! Alias template expansion.
//!
//! An alias maps a name to a command-line template. When invoked, the
//! caller's arguments are substituted into the template:
//!
//! | Placeholder | Replaced by |
//! |-------------|-------------|
//! | `$*` | all arguments, re-quoted |
//! | `$1` … `$9` | one argument, re-quoted; empty if missing |
//!
//! A template without placeholders gets the arguments appended.

use super::split::join_args;

/// Expands `template` with `args` into a new command line.
pub fn expand_alias(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut substituted = false;
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('*') => {
                chars.next();
                out.push_str(&join_args(args));
                substituted = true;
            }
            Some(d @ '1'..='9') => {
                chars.next();
                let idx = d as usize - '1' as usize;
                if let Some(arg) = args.get(idx) {
                    out.push_str(&join_args(std::slice::from_ref(arg)));
                }
                substituted = true;
            }
            _ => out.push('$'),
        }
    }

    if !substituted && !args.is_empty() {
        out.push(' ');
        out.push_str(&join_args(args));
    }
    out
}
