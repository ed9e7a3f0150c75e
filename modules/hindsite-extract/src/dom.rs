//! Shared DOM helpers over `scraper`: titles and document metadata.

use scraper::{Html, Selector};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Best-effort title: og:title, then <title>, then the first h1.
pub fn extract_title(doc: &Html) -> String {
    let og = selector(r#"meta[property="og:title"]"#);
    if let Some(el) = doc.select(&og).next() {
        if let Some(content) = el.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }
    let title = selector("title");
    if let Some(el) = doc.select(&title).next() {
        let text: String = el.text().collect();
        let text = text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
    }
    let h1 = selector("h1");
    if let Some(el) = doc.select(&h1).next() {
        let text: String = el.text().collect();
        return text.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    String::new()
}

/// Document metadata worth keeping on the page record. Keys are stable; absent
/// values are omitted.
pub fn extract_metadata(doc: &Html) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    let mut put_meta = |key: &str, css: &str| {
        if let Some(el) = doc.select(&selector(css)).next() {
            if let Some(content) = el.value().attr("content") {
                let content = content.trim();
                if !content.is_empty() {
                    map.insert(key.to_string(), serde_json::Value::String(content.into()));
                }
            }
        }
    };
    put_meta("description", r#"meta[name="description"]"#);
    put_meta("og_description", r#"meta[property="og:description"]"#);
    put_meta("og_site_name", r#"meta[property="og:site_name"]"#);
    put_meta("og_type", r#"meta[property="og:type"]"#);
    put_meta("author", r#"meta[name="author"]"#);
    put_meta("published_time", r#"meta[property="article:published_time"]"#);
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<html><head>
        <title>Fallback Title</title>
        <meta property="og:title" content="The Real Title" />
        <meta name="description" content="A summary." />
        <meta name="author" content="Jordan Writer" />
        <meta property="article:published_time" content="2024-03-15T12:00:00Z" />
    </head><body><h1>Heading</h1><p>Body</p></body></html>"#;

    #[test]
    fn prefers_og_title() {
        let doc = Html::parse_document(DOC);
        assert_eq!(extract_title(&doc), "The Real Title");
    }

    #[test]
    fn falls_back_to_title_tag() {
        let doc = Html::parse_document("<html><head><title>Only Title</title></head></html>");
        assert_eq!(extract_title(&doc), "Only Title");
    }

    #[test]
    fn metadata_keys() {
        let doc = Html::parse_document(DOC);
        let meta = extract_metadata(&doc);
        assert_eq!(meta["description"], "A summary.");
        assert_eq!(meta["author"], "Jordan Writer");
        assert_eq!(meta["published_time"], "2024-03-15T12:00:00Z");
        assert!(meta.get("og_site_name").is_none());
    }
}
