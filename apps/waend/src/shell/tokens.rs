/// Splits one command into tokens on whitespace. A chunk opened by `'` or
/// `"` runs to the matching quote and keeps its spaces.
pub fn cli_split(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '"' | '\'' => {
                chars.next();
                let chunk: String = chars.by_ref().take_while(|&ch| ch != c).collect();
                tokens.push(chunk);
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut chunk = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    chunk.push(ch);
                    chars.next();
                }
                tokens.push(chunk);
            }
        }
    }
    tokens
}

/// Splits a command line into pipeline stages on `|`. Bars inside quotes
/// and `\|` do not split; the escape is dropped.
pub fn split_pipeline(line: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut stage = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) if chars.peek() == Some(&'|') => {
                stage.push('|');
                chars.next();
            }
            ('"' | '\'', None) => {
                quote = Some(c);
                stage.push(c);
            }
            (c, Some(open)) if c == open => {
                quote = None;
                stage.push(c);
            }
            ('|', None) => {
                stages.push(stage.trim().to_string());
                stage.clear();
            }
            _ => stage.push(c),
        }
    }
    stages.push(stage.trim().to_string());
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(cli_split("cmd arg"), vec!["cmd", "arg"]);
        assert_eq!(cli_split("  cmd   arg0\targ1 "), vec!["cmd", "arg0", "arg1"]);
        assert!(cli_split("   ").is_empty());
    }

    #[test]
    fn quoted_chunks_keep_spaces() {
        assert_eq!(cli_split(r#"cmd "arg0 arg1""#), vec!["cmd", "arg0 arg1"]);
        assert_eq!(
            cli_split(r#"cmd '"arg0 arg1" arg2' arg3"#),
            vec!["cmd", r#""arg0 arg1" arg2"#, "arg3"]
        );
        assert_eq!(
            cli_split(r#"cmd "'arg0 arg1 arg2' arg3" "arg4 arg5""#),
            vec!["cmd", "'arg0 arg1 arg2' arg3", "arg4 arg5"]
        );
        assert_eq!(cli_split(r#"set name """#), vec!["set", "name", ""]);
    }

    #[test]
    fn pipeline_respects_quotes_and_escapes() {
        assert_eq!(split_pipeline("gg | sg"), vec!["gg", "sg"]);
        assert_eq!(split_pipeline("echo 'a|b' | read"), vec!["echo 'a|b'", "read"]);
        assert_eq!(split_pipeline(r"echo a\|b"), vec!["echo a|b"]);
        assert_eq!(split_pipeline(""), vec![""]);
        assert_eq!(split_pipeline("a | | b"), vec!["a", "", "b"]);
    }
}
