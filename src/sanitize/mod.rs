use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

/// The one `data-*` attribute that survives sanitation: it names the blob
/// behind an inline image so the cid rewrite can find its mapping.
pub const BLOB_KEY_ATTR: &str = "data-blob-key";

/// An inline image attached to the campaign, keyed by blob and addressed in
/// the outgoing MIME by content id.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImageRef {
    pub blob_key: String,
    pub content_id: String,
}

/// Stylesheet giving editor-framework classes their meaning once the
/// framework itself is gone. Injected once at the head of the fragment.
const FRAMEWORK_STYLESHEET: &str = "<style>\n\
.ql-align-center { text-align: center; }\n\
.ql-align-right { text-align: right; }\n\
.ql-align-justify { text-align: justify; }\n\
.ql-indent-1 { padding-left: 3em; }\n\
.ql-indent-2 { padding-left: 6em; }\n\
.ql-indent-3 { padding-left: 9em; }\n\
.ql-indent-4 { padding-left: 12em; }\n\
.ql-indent-5 { padding-left: 15em; }\n\
.ql-indent-6 { padding-left: 18em; }\n\
.ql-indent-7 { padding-left: 21em; }\n\
.ql-indent-8 { padding-left: 24em; }\n\
.ql-size-small { font-size: 0.75em; }\n\
.ql-size-large { font-size: 1.5em; }\n\
.ql-size-huge { font-size: 2.5em; }\n\
.ql-font-serif { font-family: Georgia, 'Times New Roman', serif; }\n\
.ql-font-monospace { font-family: Monaco, 'Courier New', monospace; }\n\
</style>";

struct SanitizeRegexes {
    clipboard_div: Regex,
    clipboard_span: Regex,
    tag: Regex,
    editor_attr: Regex,
    data_attr: Regex,
    p_br: Regex,
    p_blank: Regex,
    img_tag: Regex,
    img_blob_key: Regex,
    img_src: Regex,
    script_block: Regex,
    script_tag: Regex,
    on_attr: Regex,
}

fn regexes() -> &'static SanitizeRegexes {
    static REGEXES: OnceLock<SanitizeRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| SanitizeRegexes {
        clipboard_div: Regex::new(
            r#"(?is)<div[^>]*class\s*=\s*["'][^"']*ql-(?:clipboard|tooltip)[^"']*["'][^>]*>.*?</div>"#,
        )
        .unwrap(),
        clipboard_span: Regex::new(
            r#"(?is)<span[^>]*class\s*=\s*["'][^"']*ql-(?:clipboard|tooltip)[^"']*["'][^>]*>.*?</span>"#,
        )
        .unwrap(),
        tag: Regex::new(r"(?s)<[a-zA-Z][^>]*>").unwrap(),
        editor_attr: Regex::new(
            r#"(?i)\s(?:contenteditable|spellcheck|autocorrect|autocapitalize)(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*))?"#,
        )
        .unwrap(),
        data_attr: Regex::new(
            r#"(?i)\s(data-[a-z0-9_-]+)(\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*))?"#,
        )
        .unwrap(),
        p_br: Regex::new(r"(?i)<p>\s*<br\s*/?\s*>\s*</p>").unwrap(),
        p_blank: Regex::new(r"(?i)<p>\s+</p>").unwrap(),
        img_tag: Regex::new(r"(?is)<img\b[^>]*>").unwrap(),
        img_blob_key: Regex::new(r#"(?i)data-blob-key\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap(),
        img_src: Regex::new(r#"(?i)\bsrc\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap(),
        script_block: Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap(),
        script_tag: Regex::new(r"(?i)</?script\b[^>]*>").unwrap(),
        on_attr: Regex::new(r#"(?i)\son[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).unwrap(),
    })
}

/// Transform an authored HTML fragment into an email-safe document. Pure and
/// best-effort: malformed input comes out as well as it went in, and running
/// the function over its own output changes nothing.
///
/// `class` attributes and author `<style>` blocks pass through verbatim;
/// personalization placeholders are untouched and consumed downstream.
pub fn sanitize(html: &str, images: &[InlineImageRef]) -> String {
    let re = regexes();

    // Editor scratch containers and editing-session attributes
    let out = re.clipboard_div.replace_all(html, "");
    let out = re.clipboard_span.replace_all(&out, "");
    let out = re
        .tag
        .replace_all(&out, |caps: &regex::Captures| {
            strip_editor_attrs(&caps[0])
        })
        .into_owned();

    // Framework stylesheet, once at the head of the fragment
    let out = if out.contains(FRAMEWORK_STYLESHEET) {
        out
    } else {
        format!("{FRAMEWORK_STYLESHEET}\n{out}")
    };

    // Blank paragraphs survive mail clients only as &nbsp;
    let out = re.p_br.replace_all(&out, "<p>&nbsp;</p>");
    let out = re.p_blank.replace_all(&out, "<p>&nbsp;</p>");
    let out = out.replace("<p></p>", "");

    let out = rewrite_inline_images(&out, images);

    // Scripts and inline handlers
    let out = re.script_block.replace_all(&out, "");
    let out = re.script_tag.replace_all(&out, "");
    re.tag
        .replace_all(&out, |caps: &regex::Captures| {
            re.on_attr.replace_all(&caps[0], "").into_owned()
        })
        .into_owned()
}

fn strip_editor_attrs(tag: &str) -> String {
    let re = regexes();
    let tag = re.editor_attr.replace_all(tag, "");
    re.data_attr
        .replace_all(&tag, |caps: &regex::Captures| {
            if caps[1].eq_ignore_ascii_case(BLOB_KEY_ATTR) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn blob_key_of(img_tag: &str) -> Option<String> {
    let caps = regexes().img_blob_key.captures(img_tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn rewrite_inline_images(html: &str, images: &[InlineImageRef]) -> String {
    if images.is_empty() {
        return html.to_string();
    }
    let re = regexes();

    let by_key: HashMap<&str, &str> = images
        .iter()
        .map(|i| (i.blob_key.as_str(), i.content_id.as_str()))
        .collect();

    // Embedded data: images without a blob-key attribute consume the images
    // not claimed by any keyed <img>, in document order.
    let claimed: HashSet<String> = re
        .img_tag
        .find_iter(html)
        .filter_map(|m| blob_key_of(m.as_str()))
        .collect();
    let mut unclaimed: VecDeque<&str> = images
        .iter()
        .filter(|i| !claimed.contains(&i.blob_key))
        .map(|i| i.content_id.as_str())
        .collect();

    re.img_tag
        .replace_all(html, |caps: &regex::Captures| {
            let tag = &caps[0];
            let content_id = match blob_key_of(tag) {
                Some(key) => by_key.get(key.as_str()).copied(),
                None => {
                    let src_is_data = re
                        .img_src
                        .find(tag)
                        .map(|m| {
                            let value = m.as_str();
                            value.contains("\"data:") || value.contains("'data:")
                        })
                        .unwrap_or(false);
                    if src_is_data {
                        unclaimed.pop_front()
                    } else {
                        None
                    }
                }
            };

            match content_id {
                Some(cid) => re
                    .img_src
                    .replace(tag, format!(r#"src="cid:{cid}""#).as_str())
                    .into_owned(),
                None => tag.to_string(),
            }
        })
        .into_owned()
}
