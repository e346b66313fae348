//! 配置文件脱敏
//!
//! 键名包含 password / secret / key / token / auth（不区分大小写）的值会被替换成固定标记，
//! 注释、空行和键名原样保留。支持 dotenv、TOML/INI、YAML 和逐行书写的 JSON；
//! YAML 块标量和跨行的引号值会连同后续行一起替换。

use crate::constants::sanitize::{REDACTED_MARKER, SENSITIVE_KEY_PATTERNS};

/// 键名是否像凭据
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// 被替换的值是否延续到后面的行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    None,
    /// YAML `|` / `>` 块，缩进比键更深的行都属于该值
    Block { indent: usize },
    /// 引号没有在本行闭合
    Quoted(char),
}

struct RedactedLine {
    line: String,
    continuation: Continuation,
}

/// 对整份配置文本脱敏，返回脱敏后的文本和被替换的键数量
pub fn sanitize_config(content: &str) -> (String, usize) {
    let mut redacted = 0;
    let mut out = String::with_capacity(content.len());
    let mut state = Continuation::None;
    // 块标量中的空行，要等到下一行才知道是否属于该值
    let mut held_blank = String::new();

    for line in content.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);

        match state {
            Continuation::None => {}
            Continuation::Block { indent } => {
                if body.trim().is_empty() {
                    held_blank.push_str(line);
                    continue;
                }
                if indent_width(body) > indent {
                    held_blank.clear();
                    continue;
                }
                out.push_str(&held_blank);
                held_blank.clear();
                state = Continuation::None;
            }
            Continuation::Quoted(quote) => {
                if let Some(end) = closing_quote(body, quote) {
                    state = Continuation::None;
                    let rest = body[end + quote.len_utf8()..].trim();
                    if !rest.is_empty() {
                        out.push_str(rest);
                        out.push_str(ending);
                    }
                }
                continue;
            }
        }

        match sanitize_line(body) {
            Some(replaced) => {
                redacted += 1;
                out.push_str(&replaced.line);
                state = replaced.continuation;
            }
            None => out.push_str(body),
        }
        out.push_str(ending);
    }
    out.push_str(&held_blank);

    (out, redacted)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// 需要替换时返回新行，否则返回 None
fn sanitize_line(line: &str) -> Option<RedactedLine> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') || trimmed.starts_with("//") {
        return None;
    }

    let sep_pos = find_separator(line)?;
    let (head, rest) = line.split_at(sep_pos);
    let separator = &rest[..1];
    let value_part = &rest[1..];

    let key = head
        .trim()
        .trim_start_matches("export ")
        .trim_start_matches('-')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    if key.is_empty() || !is_sensitive_key(key) {
        return None;
    }

    let value = value_part.trim_start();
    let leading_ws = &value_part[..value_part.len() - value.len()];

    if let Some(quote) = value.chars().next().filter(|c| matches!(*c, '"' | '\'')) {
        let inner = &value[quote.len_utf8()..];
        let replacement = format!("{quote}{REDACTED_MARKER}{quote}");
        return Some(match closing_quote(inner, quote) {
            Some(end) => {
                // 闭合引号之后的逗号或注释原样保留
                let tail = inner[end + quote.len_utf8()..].trim_end();
                RedactedLine {
                    line: format!("{head}{separator}{leading_ws}{replacement}{tail}"),
                    continuation: Continuation::None,
                }
            }
            None => RedactedLine {
                line: format!("{head}{separator}{leading_ws}{replacement}"),
                continuation: Continuation::Quoted(quote),
            },
        });
    }

    let (bare, comment) = split_inline_comment(value);
    let bare = bare.trim_end();
    // YAML 的嵌套块（`auth:` 后面没有值）保持不变
    if bare.is_empty() || bare == "{" || bare == "[" {
        return None;
    }
    let (bare, trailing_comma) = match bare.strip_suffix(',') {
        Some(core) => (core.trim_end(), ","),
        None => (bare, ""),
    };

    let continuation = if is_block_indicator(bare) {
        Continuation::Block {
            indent: indent_width(line),
        }
    } else {
        Continuation::None
    };

    Some(RedactedLine {
        line: format!(
            "{head}{separator}{leading_ws}{REDACTED_MARKER}{trailing_comma}{}",
            comment.trim_end()
        ),
        continuation,
    })
}

/// 未加引号的值与行内注释（`#` 或 `;`，前面必须有空白）分开，注释部分含前导空白
fn split_inline_comment(value: &str) -> (&str, &str) {
    let mut prev_ws = false;
    for (idx, c) in value.char_indices() {
        if prev_ws && matches!(c, '#' | ';') {
            let bare = value[..idx].trim_end();
            return (bare, &value[bare.len()..]);
        }
        prev_ws = c.is_whitespace();
    }
    (value, "")
}

/// YAML 块标量标记，如 `|`、`>-`、`|2`
fn is_block_indicator(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some('|' | '>'))
        && chars.all(|c| matches!(c, '-' | '+') || c.is_ascii_digit())
}

/// 引号内文本中第一个闭合引号的位置；双引号支持反斜杠转义，单引号支持 `''`
fn closing_quote(text: &str, quote: char) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if quote == '"' && c == '\\' {
            chars.next();
            continue;
        }
        if c == quote {
            if quote == '\'' && matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                continue;
            }
            return Some(idx);
        }
    }
    None
}

/// 第一个不在引号中的 `=` 或 `:`
fn find_separator(line: &str) -> Option<usize> {
    let mut in_quote: Option<char> = None;

    for (idx, c) in line.char_indices() {
        match (in_quote, c) {
            (None, '"' | '\'') => in_quote = Some(c),
            (Some(q), c) if c == q => in_quote = None,
            (None, '=' | ':') => return Some(idx),
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotenv_redaction() {
        let input = "# Twilio credentials\nTWILIO_AUTH_TOKEN=abc123\nexport OPENAI_API_KEY=\"sk-xyz\"\nPORT=3000\n\nDB_PASSWORD = hunter2\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 3);
        assert_eq!(
            out,
            "# Twilio credentials\nTWILIO_AUTH_TOKEN=***REDACTED***\nexport OPENAI_API_KEY=\"***REDACTED***\"\nPORT=3000\n\nDB_PASSWORD = ***REDACTED***\n"
        );
    }

    #[test]
    fn test_yaml_and_toml() {
        let input = "server:\n  port: 8080\n  secret: 'shh'\nauth:\n  provider: local\n[session]\njwt_secret = \"value\" \n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 2);
        assert!(out.contains("  secret: '***REDACTED***'\n"));
        // 嵌套块的父键不替换
        assert!(out.contains("auth:\n  provider: local\n"));
        assert!(out.contains("jwt_secret = \"***REDACTED***\"\n"));
        assert!(out.contains("  port: 8080\n"));
    }

    #[test]
    fn test_json_lines_keep_commas() {
        let input = "{\n  \"apiKey\": \"abc\",\n  \"name\": \"demo\"\n}\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 1);
        assert_eq!(
            out,
            "{\n  \"apiKey\": \"***REDACTED***\",\n  \"name\": \"demo\"\n}\n"
        );
    }

    #[test]
    fn test_value_with_separator_inside_quotes() {
        let (out, count) = sanitize_config("DATABASE_URL=postgres://u:p@h/db\nSESSION_KEY=\"a:b=c\"");
        // DATABASE_URL 不含敏感子串，保持原样
        assert_eq!(count, 1);
        assert_eq!(out, "DATABASE_URL=postgres://u:p@h/db\nSESSION_KEY=\"***REDACTED***\"");
    }

    #[test]
    fn test_yaml_block_scalar_is_fully_redacted() {
        let input = "tls:\n  private_key: |\n    MIIEvQIBADANBg\n\n    SUPERSECRETMATERIAL\n  cert_file: /etc/tls/cert.pem\nport: 443\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 1);
        assert_eq!(
            out,
            "tls:\n  private_key: ***REDACTED***\n  cert_file: /etc/tls/cert.pem\nport: 443\n"
        );
    }

    #[test]
    fn test_folded_block_at_end_of_file() {
        let input = "service:\n  api_token: >-\n    first-half\n    second-half\n\n";
        let (out, _) = sanitize_config(input);

        assert!(!out.contains("half"));
        assert_eq!(out, "service:\n  api_token: ***REDACTED***\n\n");
    }

    #[test]
    fn test_multiline_quoted_dotenv_value() {
        let input = "PRIVATE_KEY=\"-----BEGIN KEY-----\nSUPERSECRETLINE\n-----END KEY-----\"\nPORT=3000\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 1);
        assert_eq!(out, "PRIVATE_KEY=\"***REDACTED***\"\nPORT=3000\n");
    }

    #[test]
    fn test_escaped_quote_does_not_close_value() {
        let input = "SECRET=\"abc\\\"\nstill-secret\"\nNAME=demo\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 1);
        assert_eq!(out, "SECRET=\"***REDACTED***\"\nNAME=demo\n");
    }

    #[test]
    fn test_inline_comments_are_kept() {
        let input = "API_TOKEN=abc # rotated monthly\nDB_PASSWORD=\"p#ss\" # vault\nauth_key = k1 ; ini style\nAPI_KEY=a#b\n";
        let (out, count) = sanitize_config(input);

        assert_eq!(count, 4);
        assert_eq!(
            out,
            "API_TOKEN=***REDACTED*** # rotated monthly\nDB_PASSWORD=\"***REDACTED***\" # vault\nauth_key = ***REDACTED*** ; ini style\nAPI_KEY=***REDACTED***\n"
        );
    }

    #[test]
    fn test_sensitive_key_matching() {
        assert!(is_sensitive_key("Authorization"));
        assert!(is_sensitive_key("STRIPE_SECRET"));
        assert!(is_sensitive_key("api_key"));
        assert!(!is_sensitive_key("PORT"));
        assert!(!is_sensitive_key("username"));
    }
}
