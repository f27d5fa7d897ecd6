// SPDX-License-Identifier: MIT

//! Argument templates for command tasks
//!
//! A template is a shell-like string such as `"%SIPUUID%" "Dataverse"`.
//! It is split into arguments first and placeholders are substituted per
//! argument afterwards, so a value containing spaces stays one argument.

use std::collections::BTreeMap;

/// Split a template into arguments, honouring single and double quotes
pub fn split_arguments(template: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => match chars.peek() {
                Some(&next) if next == '"' || next == '\\' => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(c),
            },
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}

/// Replace every placeholder occurring in `arg`
///
/// Placeholders are matched literally, delimiters included (`%SIPUUID%`).
/// The argument is scanned once from left to right and the longest key
/// matching at each position wins. Substituted values are never rescanned.
pub fn substitute(arg: &str, replacements: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<&String> = replacements.keys().filter(|k| !k.is_empty()).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(c) = rest.chars().next() {
        match keys.iter().find(|key| rest.starts_with(key.as_str())) {
            Some(key) => {
                out.push_str(&replacements[*key]);
                rest = &rest[key.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// Split `template` and substitute placeholders in every argument
pub fn render_arguments(template: &str, replacements: &BTreeMap<String, String>) -> Vec<String> {
    split_arguments(template)
        .iter()
        .map(|arg| substitute(arg, replacements))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(
            split_arguments(r#""%SIPUUID%" "Dataverse""#),
            vec!["%SIPUUID%", "Dataverse"]
        );
        assert_eq!(
            split_arguments(r#"--name 'two words' plain"#),
            vec!["--name", "two words", "plain"]
        );
        assert_eq!(split_arguments(r#"a"b c"d"#), vec!["ab cd"]);
    }

    #[test]
    fn test_split_empty_and_whitespace() {
        assert!(split_arguments("").is_empty());
        assert!(split_arguments("   \t ").is_empty());
        assert_eq!(split_arguments(r#""""#), vec![""]);
    }

    #[test]
    fn test_split_escaped_quote() {
        assert_eq!(
            split_arguments(r#""say \"hi\"" x"#),
            vec![r#"say "hi""#, "x"]
        );
    }

    #[test]
    fn test_substitution_after_split() {
        let args = render_arguments(
            r#""%SIPUUID%" "%SIPName%""#,
            &map(&[("%SIPUUID%", "1234"), ("%SIPName%", "my transfer")]),
        );
        assert_eq!(args, vec!["1234", "my transfer"]);
    }

    #[test]
    fn test_longer_key_first() {
        let out = substitute(
            "%SIPDirectory%",
            &map(&[("%SIP", "wrong"), ("%SIPDirectory%", "/tmp/sip/")]),
        );
        assert_eq!(out, "/tmp/sip/");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let out = substitute(
            "%SIPDirectory%%SIPUUID%",
            &map(&[
                ("%SIPDirectory%", "/incoming/%SIPUUID%/"),
                ("%SIPUUID%", "u-1"),
            ]),
        );
        assert_eq!(out, "/incoming/%SIPUUID%/u-1");
    }

    #[test]
    fn test_unknown_placeholder_left_alone() {
        assert_eq!(substitute("%unknown%", &map(&[])), "%unknown%");
    }
}
