//! Text minifiers for HTML, CSS, JavaScript and SVG
//!
//! All of them are conservative: they remove comments and non-semantic
//! whitespace and leave everything else byte-for-byte. Raw-text regions
//! (`<pre>`, `<textarea>`, `<script>`, `<style>`, string literals) are never
//! touched.

use super::OptimizeError;
use lazy_static::lazy_static;
use regex::Regex;

/// Elements whose content is copied verbatim
const RAW_TEXT_TAGS: [&str; 4] = ["pre", "textarea", "script", "style"];

lazy_static! {
    static ref SVG_COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").expect("Invalid svg comment regex");
    static ref SVG_BETWEEN_TAGS: Regex = Regex::new(r">\s+<").expect("Invalid svg whitespace regex");
    static ref SVG_WHITESPACE: Regex = Regex::new(r"\s+").expect("Invalid svg whitespace regex");
}

/// Minifies an HTML document
///
/// Comments are dropped, whitespace runs collapse to one space, and
/// indentation between tags is removed. Inside a tag only the whitespace
/// between attributes collapses; quoted attribute values are kept as-is.
///
/// # Errors
///
/// Returns `OptimizeError::Minify` for an unterminated comment, since the
/// rest of the document cannot be told apart from comment text.
pub fn minify_html(input: &str) -> Result<String, OptimizeError> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        let rest = &input[i..];

        if rest.starts_with("<!--") {
            match rest[4..].find("-->") {
                Some(end) => {
                    i += 4 + end + 3;
                    continue;
                }
                None => return Err(OptimizeError::Minify("unterminated HTML comment".into())),
            }
        }

        if bytes[i] == b'<' {
            if let Some(tag) = raw_text_tag(rest) {
                let end = raw_text_end(rest, tag);
                out.push_str(&rest[..end]);
                i += end;
                continue;
            }
            if let Some(end) = tag_end(rest) {
                push_tag(&mut out, &rest[..end]);
                i += end;
                continue;
            }
        }

        if bytes[i].is_ascii_whitespace() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let prev = out.as_bytes().last().copied();
            let next = bytes.get(i).copied();
            let indentation =
                prev == Some(b'>') && next == Some(b'<') && input[start..i].contains('\n');
            if prev.is_some() && next.is_some() && !indentation {
                out.push(' ');
            }
            continue;
        }

        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'<' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        out.push_str(&input[start..i]);
    }

    Ok(out)
}

/// Byte length of the tag opening `rest`, through its `>`
///
/// Quoted attribute values may contain `>`. Returns `None` when `rest` does
/// not open a tag or the tag never closes, so the `<` is treated as text.
fn tag_end(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    if !matches!(bytes.get(1), Some(b) if b.is_ascii_alphabetic() || *b == b'/' || *b == b'!') {
        return None;
    }

    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Appends a tag, collapsing whitespace outside quoted values
fn push_tag(out: &mut String, tag: &str) {
    let mut quote = None;
    let mut in_space = false;

    for c in tag.chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_ascii_whitespace() {
            in_space = true;
            continue;
        }
        if in_space && c != '>' {
            out.push(' ');
        }
        in_space = false;
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
}

/// Returns the raw-text element name if `rest` opens one
fn raw_text_tag(rest: &str) -> Option<&'static str> {
    let name_len = rest[1..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    let name = &rest[1..1 + name_len];
    let after = rest.as_bytes().get(1 + name_len).copied();
    if !matches!(after, Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r')) {
        return None;
    }
    RAW_TEXT_TAGS
        .iter()
        .find(|tag| tag.eq_ignore_ascii_case(name))
        .copied()
}

/// Byte length of a raw-text element, through its closing tag
///
/// An element without a closing tag runs to the end of the input.
fn raw_text_end(rest: &str, tag: &str) -> usize {
    let lower = rest.to_ascii_lowercase();
    let closing = format!("</{}", tag);
    match lower[1..].find(&closing) {
        Some(pos) => {
            let close_start = pos + 1;
            lower[close_start..]
                .find('>')
                .map_or(rest.len(), |gt| close_start + gt + 1)
        }
        None => rest.len(),
    }
}

/// Minifies a stylesheet
///
/// # Errors
///
/// Returns `OptimizeError::Minify` for an unterminated comment or string.
pub fn minify_css(input: &str) -> Result<String, OptimizeError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(OptimizeError::Minify("unterminated CSS comment".into()));
                }
            }
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
                let mut closed = false;
                while let Some(s) = chars.next() {
                    out.push(s);
                    if s == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if s == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(OptimizeError::Minify("unterminated CSS string".into()));
                }
            }
            c if c.is_whitespace() => pending_space = true,
            c => {
                flush_space(&mut out, &mut pending_space, c);
                if c == '}' && out.ends_with(';') {
                    out.pop();
                }
                out.push(c);
            }
        }
    }

    Ok(out)
}

/// Emits a collapsed space unless punctuation on either side makes it redundant
fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if !*pending {
        return;
    }
    *pending = false;
    let Some(prev) = out.chars().last() else {
        return;
    };
    let tight = |c: char| matches!(c, '{' | '}' | ';' | ',' | '>');
    if tight(prev) || prev == ':' || tight(next) {
        return;
    }
    out.push(' ');
}

/// Minifies a script
///
/// Only line-level rewriting: trailing whitespace, blank lines and lines
/// that are entirely `//` comments are removed. Lines inside a multi-line
/// template literal are kept verbatim.
pub fn minify_js(input: &str) -> Result<String, OptimizeError> {
    let mut out = String::with_capacity(input.len());
    let mut in_template = false;

    for line in input.lines() {
        if in_template {
            out.push_str(line);
            out.push('\n');
        } else {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }

        if unescaped_backticks(line) % 2 == 1 {
            in_template = !in_template;
        }
    }

    Ok(out)
}

fn unescaped_backticks(line: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in line.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '`' if !escaped => count += 1,
            _ => escaped = false,
        }
        if c != '\\' {
            escaped = false;
        }
    }
    count
}

/// Minifies an SVG document
pub fn minify_svg(input: &str) -> Result<String, OptimizeError> {
    let without_comments = SVG_COMMENT.replace_all(input, "");
    let tight = SVG_BETWEEN_TAGS.replace_all(&without_comments, "><");
    Ok(SVG_WHITESPACE.replace_all(&tight, " ").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_collapses_whitespace_and_comments() {
        let html = "<html>\n  <body>\n    <!-- nav -->\n    <p>Hello    <b>big</b>   world</p>\n  </body>\n</html>\n";
        let minified = minify_html(html).unwrap();
        assert_eq!(minified, "<html><body><p>Hello <b>big</b> world</p></body></html>");
    }

    #[test]
    fn test_html_preserves_raw_text() {
        let html = "<div>\n  <pre>  keep\n   this  </pre>\n  <script>\n  var a  =  1; // c\n</script>\n</div>";
        let minified = minify_html(html).unwrap();
        assert!(minified.contains("<pre>  keep\n   this  </pre>"));
        assert!(minified.contains("<script>\n  var a  =  1; // c\n</script>"));
    }

    #[test]
    fn test_html_raw_text_is_case_insensitive() {
        let html = "<STYLE>\n a { }  </STYLE>\n<p>x</p>";
        let minified = minify_html(html).unwrap();
        assert!(minified.starts_with("<STYLE>\n a { }  </STYLE>"));
    }

    #[test]
    fn test_html_keeps_attribute_values() {
        let html = "<input value=\"a   b\"><p title=\"x\n  y\"   class='c  d'\n>t</p>";
        assert_eq!(
            minify_html(html).unwrap(),
            "<input value=\"a   b\"><p title=\"x\n  y\" class='c  d'>t</p>"
        );
    }

    #[test]
    fn test_html_quoted_gt_stays_in_tag() {
        let html = "<a title=\"1 > 0\"  href=\"/x\">x  y</a> <br />";
        assert_eq!(
            minify_html(html).unwrap(),
            "<a title=\"1 > 0\" href=\"/x\">x y</a> <br />"
        );
    }

    #[test]
    fn test_html_unterminated_comment_is_error() {
        assert!(minify_html("<p>a</p><!-- never closed").is_err());
    }

    #[test]
    fn test_html_keeps_non_ascii() {
        let html = "<p>café   ☕</p>";
        assert_eq!(minify_html(html).unwrap(), "<p>café ☕</p>");
    }

    #[test]
    fn test_css_minify() {
        let css = "/* header */\nbody {\n  color : red ;\n  margin: 0 auto;\n}\n\na > b , c { content: \"a  /* not */ b\"; }\n";
        let minified = minify_css(css).unwrap();
        assert_eq!(
            minified,
            "body{color :red;margin:0 auto}a>b,c{content:\"a  /* not */ b\"}"
        );
    }

    #[test]
    fn test_css_unterminated_comment_is_error() {
        assert!(minify_css("a { color: red; } /* oops").is_err());
    }

    #[test]
    fn test_js_minify() {
        let js = "// banner\nfunction f() {\n\n    return 1;   \n}\n";
        assert_eq!(minify_js(js).unwrap(), "function f() {\n    return 1;\n}\n");
    }

    #[test]
    fn test_js_keeps_template_literals() {
        let js = "const t = `line one\n\n// not a comment\n`;\n";
        let minified = minify_js(js).unwrap();
        assert!(minified.contains("\n\n// not a comment\n"));
    }

    #[test]
    fn test_svg_minify() {
        let svg = "<svg>\n  <!-- icon -->\n  <path   d=\"M0 0\"/>\n</svg>\n";
        assert_eq!(minify_svg(svg).unwrap(), "<svg><path d=\"M0 0\"/></svg>");
    }
}
