//! Quoting-aware, shell-style tokenizer for gate and audit command strings.
//!
//! Deliberately dependency-free and much smaller than a real shell: it
//! understands whitespace splitting, single quotes (literal), double quotes
//! (with `\"`, `\\`, `\$` and `` \` `` escapes), and backslash escapes outside
//! quotes. No expansion of any kind.

use anyhow::{Result, anyhow};

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            '\'' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(anyhow!("unterminated single quote in command")),
                    }
                }
            }
            '"' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(anyhow!("unterminated double quote in command")),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(anyhow!("unterminated double quote in command")),
                    }
                }
            }
            '\\' => {
                has_token = true;
                match chars.next() {
                    Some(esc) => current.push(esc),
                    None => return Err(anyhow!("trailing backslash in command")),
                }
            }
            _ => {
                has_token = true;
                current.push(c);
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Tokenize a command string, treating an empty token list as a configuration
/// error rather than a silent no-op.
pub fn tokenize_command(input: &str) -> Result<Vec<String>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(anyhow!("command is empty after tokenization: '{input}'"));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(
            tokenize("cargo  test --all").expect("tokenize"),
            vec!["cargo", "test", "--all"]
        );
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(
            tokenize("echo 'hello  world' '$HOME'").expect("tokenize"),
            vec!["echo", "hello  world", "$HOME"]
        );
    }

    #[test]
    fn double_quotes_honor_escapes() {
        assert_eq!(
            tokenize(r#"echo "a \"b\" \\ \$x""#).expect("tokenize"),
            vec!["echo", r#"a "b" \ $x"#]
        );
    }

    #[test]
    fn unknown_escape_in_double_quotes_keeps_backslash() {
        assert_eq!(
            tokenize(r#"grep "\d+""#).expect("tokenize"),
            vec!["grep", r"\d+"]
        );
    }

    #[test]
    fn backslash_outside_quotes_escapes_next_char() {
        assert_eq!(
            tokenize(r"touch a\ b").expect("tokenize"),
            vec!["touch", "a b"]
        );
    }

    #[test]
    fn empty_quotes_produce_empty_token() {
        assert_eq!(tokenize("run '' x").expect("tokenize"), vec!["run", "", "x"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(tokenize("echo 'oops").is_err());
        assert!(tokenize("echo \"oops").is_err());
        assert!(tokenize("echo oops\\").is_err());
    }

    #[test]
    fn empty_command_is_a_configuration_error() {
        assert!(tokenize_command("").is_err());
        assert!(tokenize_command("   ").is_err());
        assert!(tokenize_command("true").is_ok());
    }
}
