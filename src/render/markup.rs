//! Template markup clean-up applied to part XML before evaluation.
//!
//! Word and Excel split typed text into runs whenever formatting, spell
//! checking or revision tracking changes mid-word, so a tag typed as
//! `{{ record.name }}` may reach us as several `<w:t>` fragments. These
//! helpers stitch tags back together and map block tags onto the XML element
//! they should replace.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref SPLIT_OPEN: Regex = Regex::new(r"\{(?:<[^>]*>)+([{%#])").unwrap();
    static ref SPLIT_CLOSE: Regex = Regex::new(r"([}%#])(?:<[^>]*>)+\}").unwrap();
    /// A complete template tag.
    pub static ref TAG: Regex = Regex::new(r"(?s)\{%.*?%\}|\{\{.*?\}\}|\{#.*?#\}").unwrap();
    static ref XML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Joins tags split across runs and strips any XML left inside them.
pub fn join_split_tags(xml: &str) -> String {
    let xml = SPLIT_OPEN.replace_all(xml, "{$1");
    let xml = SPLIT_CLOSE.replace_all(&xml, "$1}");
    TAG.replace_all(&xml, |caps: &Captures| clean_tag(&caps[0]))
        .into_owned()
}

/// Strips XML from inside a single tag and restores the characters the
/// editor escaped or prettified.
fn clean_tag(tag: &str) -> String {
    XML_TAG
        .replace_all(tag, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace(['\u{201C}', '\u{201D}', '\u{201E}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace("&amp;", "&")
}

/// Whether `text` contains any template markup.
pub fn has_markup(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

/// Replaces the `element` enclosing every `{%<marker> … %}` tag with the
/// plain `{% … %}` tag, so the element repeats or disappears with the block.
/// A tag with no enclosing element is only rewritten.
pub fn collapse_block_tags(xml: &str, marker: &str, element: &str) -> String {
    let opening = format!("{{%{marker} ");
    let mut out = xml.to_string();
    let mut search_from = 0;

    while let Some(offset) = out[search_from..].find(&opening) {
        let tag_start = search_from + offset;
        let Some(length) = out[tag_start..].find("%}") else {
            break;
        };
        let tag_end = tag_start + length + 2;
        let inner = out[tag_start + opening.len()..tag_end - 2].trim().to_string();
        let replacement = format!("{{% {inner} %}}");

        let bounds = find_open(&out[..tag_start], element)
            .zip(find_close(&out, tag_end, element));
        let (start, end) = bounds.unwrap_or((tag_start, tag_end));
        out.replace_range(start..end, &replacement);
        search_from = start + replacement.len();
    }
    out
}

/// Start of the last `<element>` or `<element …>` opening tag in `haystack`.
pub fn find_open(haystack: &str, element: &str) -> Option<usize> {
    let needle = format!("<{element}");
    let mut end = haystack.len();
    while let Some(position) = haystack[..end].rfind(&needle) {
        let after = haystack[position + needle.len()..].chars().next();
        if matches!(after, Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
            return Some(position);
        }
        end = position;
    }
    None
}

/// End of the first `</element>` at or after `from`.
pub fn find_close(haystack: &str, from: usize, element: &str) -> Option<usize> {
    let needle = format!("</{element}>");
    haystack[from..]
        .find(&needle)
        .map(|position| from + position + needle.len())
}

/// Word-processing parts: `{%tr`, `{%tc`, `{%p` and `{%r` blocks.
pub fn prepare_word_xml(xml: &str) -> String {
    let xml = join_split_tags(xml);
    [("tr", "w:tr"), ("tc", "w:tc"), ("p", "w:p"), ("r", "w:r")]
        .iter()
        .fold(xml, |xml, (marker, element)| collapse_block_tags(&xml, marker, element))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_split_tags() {
        let xml = "<w:t>{</w:t></w:r><w:r><w:t>{ record.</w:t></w:r><w:proofErr/><w:r><w:t>name }</w:t></w:r><w:r><w:t>}</w:t>";
        assert_eq!(join_split_tags(xml), "<w:t>{{ record.name }}</w:t>");
    }

    #[test]
    fn test_restores_entities_and_quotes() {
        let xml = "<w:t>{% if record.kind == \u{201C}a&amp;b\u{201D} and x &gt; 1 %}</w:t>";
        assert_eq!(
            join_split_tags(xml),
            "<w:t>{% if record.kind == \"a&b\" and x > 1 %}</w:t>"
        );
    }

    #[test]
    fn test_text_outside_tags_is_untouched() {
        let xml = "<w:t>Total &amp; \u{201C}tax\u{201D}: {{ total }}</w:t>";
        assert_eq!(join_split_tags(xml), xml);
    }

    #[test]
    fn test_collapse_paragraph() {
        let xml = concat!(
            "<w:p><w:pPr/><w:r><w:t>{%p for item in items %}</w:t></w:r></w:p>",
            "<w:p><w:r><w:t>{{ item }}</w:t></w:r></w:p>",
            "<w:p><w:r><w:t>{%p endfor %}</w:t></w:r></w:p>"
        );
        assert_eq!(
            collapse_block_tags(xml, "p", "w:p"),
            "{% for item in items %}<w:p><w:r><w:t>{{ item }}</w:t></w:r></w:p>{% endfor %}"
        );
    }

    #[test]
    fn test_collapse_skips_similar_element_names() {
        let xml = "<w:tbl><w:tr w:rsidR=\"1\"><w:trPr/><w:tc><w:p><w:r><w:t>{%tr for r in rows %}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        assert_eq!(
            collapse_block_tags(xml, "tr", "w:tr"),
            "<w:tbl>{% for r in rows %}</w:tbl>"
        );
    }

    #[test]
    fn test_run_marker_does_not_match_row_marker() {
        let xml = "<row r=\"2\"><c><is><t>{%row if x %}</t></is></c></row>";
        assert_eq!(collapse_block_tags(xml, "r", "w:r"), xml);
        assert_eq!(collapse_block_tags(xml, "row", "row"), "{% if x %}");
    }

    #[test]
    fn test_tag_without_enclosing_element_is_rewritten() {
        assert_eq!(collapse_block_tags("{%p if a %}", "p", "w:p"), "{% if a %}");
    }

    #[test]
    fn test_has_markup() {
        assert!(has_markup("Dear {{ name }}"));
        assert!(has_markup("{% if x %}"));
        assert!(!has_markup("plain {text}"));
    }
}
