use scraper::{Html, Selector};
use tracing::debug;

use legora_shared::{LegoraError, Result};

/// A compiled content-region selector.
#[derive(Debug, Clone)]
pub struct RegionSelector {
    source: String,
    selector: Selector,
}

impl RegionSelector {
    /// Compile `selector`. An unparsable selector is a `Parse` error.
    pub fn parse(selector: &str) -> Result<Self> {
        let compiled = Selector::parse(selector).map_err(|e| {
            LegoraError::parse(format!("invalid content selector `{selector}`: {e}"))
        })?;
        Ok(Self {
            source: selector.to_string(),
            selector: compiled,
        })
    }

    /// The selector as written in config.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Outer HTML of the first matching element, or `None` when the page has
    /// no such element. Malformed HTML is not an error (the parser recovers
    /// the way browsers do).
    pub fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let region = document
            .select(&self.selector)
            .next()
            .map(|element| element.html());

        debug!(selector = %self.source, found = region.is_some(), "content region lookup");
        region
    }
}

/// One-shot form of [`RegionSelector::extract`].
pub fn extract_region(html: &str, selector: &str) -> Result<Option<String>> {
    Ok(RegionSelector::parse(selector)?.extract(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>ADJ-00012345</title></head>
  <body>
    <nav>Home</nav>
    <div class="content"><h1>Decision</h1><p>The complaint is well founded.</p></div>
    <footer>Footer</footer>
  </body>
</html>"#;

    #[test]
    fn extracts_outer_html_of_region() {
        let region = extract_region(PAGE, "div.content").unwrap().expect("region");
        assert!(region.starts_with("<div class=\"content\">"));
        assert!(region.contains("The complaint is well founded."));
        assert!(region.ends_with("</div>"));
        assert!(!region.contains("Footer"));
        assert!(!region.contains("<nav>"));
    }

    #[test]
    fn first_match_wins() {
        let html = r#"<div class="content">one</div><div class="content">two</div>"#;
        let region = extract_region(html, "div.content").unwrap().expect("region");
        assert_eq!(region, r#"<div class="content">one</div>"#);
    }

    #[test]
    fn missing_region_is_none() {
        let html = "<html><body><div class=\"sidebar\">x</div></body></html>";
        assert_eq!(extract_region(html, "div.content").unwrap(), None);
    }

    #[test]
    fn custom_selector() {
        let region = extract_region(PAGE, "footer").unwrap().expect("region");
        assert_eq!(region, "<footer>Footer</footer>");
    }

    #[test]
    fn invalid_selector_is_parse_error() {
        let err = extract_region(PAGE, "div[").unwrap_err();
        assert!(matches!(err, LegoraError::Parse { .. }));

        let err = RegionSelector::parse("div[").unwrap_err();
        assert!(err.to_string().contains("div["));
    }

    #[test]
    fn compiled_selector_is_reusable() {
        let selector = RegionSelector::parse("div.content").unwrap();
        assert_eq!(selector.as_str(), "div.content");
        assert!(selector.extract(PAGE).is_some());
        assert!(selector.extract("<p>no region</p>").is_none());
    }
}
