//! Entry HTML generation.

/// How the entry HTML document is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlOptions {
    /// Template text; a minimal document when `None`.
    pub template: Option<String>,
    /// Output-relative file name.
    pub filename: String,
    pub title: String,
    /// URL of the hot client script, injected in dev.
    pub hot_client: Option<String>,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            template: None,
            filename: "index.html".to_string(),
            title: "packline".to_string(),
            hot_client: None,
        }
    }
}

/// Render the document with `<link>` and `<script defer>` tags for the given
/// URLs, in order.
///
/// Tags go before `</head>`, else before `</body>`, else at the end.
#[must_use]
pub fn render_html(options: &HtmlOptions, scripts: &[String], styles: &[String]) -> String {
    let template = options
        .template
        .clone()
        .unwrap_or_else(|| default_template(&options.title));

    let mut tags = String::new();
    for href in styles {
        tags.push_str(&format!("    <link rel=\"stylesheet\" href=\"{}\">\n", escape_attr(href)));
    }
    if let Some(client) = &options.hot_client {
        tags.push_str(&format!("    <script defer src=\"{}\"></script>\n", escape_attr(client)));
    }
    for src in scripts {
        tags.push_str(&format!("    <script defer src=\"{}\"></script>\n", escape_attr(src)));
    }

    let lower = template.to_ascii_lowercase();
    let at = lower.find("</head>").or_else(|| lower.find("</body>"));
    match at {
        Some(at) => {
            let mut out = String::with_capacity(template.len() + tags.len());
            out.push_str(&template[..at]);
            out.push_str(&tags);
            out.push_str(&template[at..]);
            out
        }
        None => template + "\n" + &tags,
    }
}

fn default_template(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    <title>{}</title>\n  </head>\n  <body>\n    <div id=\"app\"></div>\n  </body>\n</html>\n",
        escape_text(title)
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_tags_in_order() {
        let html = render_html(
            &HtmlOptions::default(),
            &["/runtime.js".to_string(), "/main.js".to_string()],
            &["/main.css".to_string()],
        );
        let head_end = html.find("</head>").unwrap();
        let runtime = html.find("src=\"/runtime.js\"").unwrap();
        let main = html.find("src=\"/main.js\"").unwrap();
        let css = html.find("href=\"/main.css\"").unwrap();
        assert!(css < runtime && runtime < main && main < head_end);
        assert!(html.contains("<title>packline</title>"));
    }

    #[test]
    fn test_template_without_head_and_hot_client() {
        let options = HtmlOptions {
            template: Some("<BODY><div id=\"root\"></div></BODY>".to_string()),
            hot_client: Some("/__packline/client.js".to_string()),
            ..HtmlOptions::default()
        };
        let html = render_html(&options, &["/main.js".to_string()], &[]);
        assert!(html.starts_with("<BODY><div id=\"root\"></div>    <script defer src=\"/__packline/client.js\">"));
        assert!(html.ends_with("</BODY>"));

        let bare = HtmlOptions {
            template: Some("<p>x</p>".to_string()),
            ..HtmlOptions::default()
        };
        assert!(render_html(&bare, &["/a.js".to_string()], &[]).ends_with("<script defer src=\"/a.js\"></script>\n"));
    }

    #[test]
    fn test_escapes_title() {
        let options = HtmlOptions {
            title: "a <b> & c".to_string(),
            ..HtmlOptions::default()
        };
        assert!(render_html(&options, &[], &[]).contains("<title>a &lt;b&gt; &amp; c</title>"));
    }
}
