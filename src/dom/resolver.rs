//! Derive stable element references and resolve them again later.

use crate::dom::query::css_escape;
use crate::dom::{NodeHandle, Page, QueryError};
use crate::error::Result;
use crate::recording::schema::ElementRef;

/// Derive a reference for a live element.
///
/// Tries the id, then a class selector that is unique in the current
/// document, then a structural path from the document root.
pub async fn derive_ref(page: &dyn Page, node: &NodeHandle) -> Result<ElementRef> {
    let info = page.describe(node).await?;

    if let Some(id) = &info.id {
        return Ok(ElementRef::new(format!("#{}", css_escape(id))));
    }

    if !info.classes.is_empty() {
        let selector: String = info
            .classes
            .iter()
            .map(|c| format!(".{}", css_escape(c)))
            .collect();
        match page.count_matches(&selector).await {
            Ok(1) => return Ok(ElementRef::new(selector)),
            Ok(n) => tracing::trace!("Class selector {} matches {} elements", selector, n),
            Err(e) => tracing::debug!("Class selector {} rejected: {}", selector, e),
        }
    }

    structural_path(page, node).await.map(ElementRef::new)
}

/// Tag path to the root, cut short at the nearest ancestor with an id.
async fn structural_path(page: &dyn Page, node: &NodeHandle) -> Result<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = Some(node.clone());

    while let Some(handle) = current {
        let info = page.describe(&handle).await?;

        if &handle != node {
            if let Some(id) = &info.id {
                segments.push(format!("#{}", css_escape(id)));
                break;
            }
        }

        let mut segment = info.tag.clone();
        if info.same_tag_siblings > 1 {
            segment.push_str(&format!(":nth-of-type({})", info.same_tag_index));
        }
        segments.push(segment);
        current = info.parent;
    }

    segments.reverse();
    Ok(segments.join(" > "))
}

/// Re-locate an element. Every failure is reported as `None`.
///
/// The ref is tried as a CSS selector first; a ref the CSS parser rejects is
/// retried as an XPath expression.
pub async fn resolve_ref(page: &dyn Page, element: &ElementRef) -> Option<NodeHandle> {
    match page.query_selector(element.as_str()).await {
        Ok(found) => found,
        Err(QueryError::InvalidSelector(_)) => match page.evaluate_xpath(element.as_str()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("Ref {} is neither CSS nor XPath: {}", element, e);
                None
            }
        },
        Err(e) => {
            tracing::debug!("Failed to resolve {}: {}", element, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::SimulatedPage;

    #[tokio::test]
    async fn test_id_ref_round_trip() {
        let page = SimulatedPage::new("https://example.com");
        let button = page
            .append(&page.body(), "button", &[("id", "login-button")])
            .unwrap();

        let element = derive_ref(&page, &button).await.unwrap();
        assert_eq!(element.as_str(), "#login-button");
        assert_eq!(resolve_ref(&page, &element).await, Some(button));
    }

    #[tokio::test]
    async fn test_numeric_id_is_escaped() {
        let page = SimulatedPage::new("https://example.com");
        let cell = page.append(&page.body(), "td", &[("id", "42")]).unwrap();

        let element = derive_ref(&page, &cell).await.unwrap();
        assert_eq!(resolve_ref(&page, &element).await, Some(cell));
    }

    #[tokio::test]
    async fn test_dash_led_ids_round_trip() {
        let page = SimulatedPage::new("https://example.com");
        for id in ["-1x", "-", "--", "-x"] {
            let el = page.append(&page.body(), "div", &[("id", id)]).unwrap();
            let element = derive_ref(&page, &el).await.unwrap();
            assert_eq!(resolve_ref(&page, &element).await, Some(el), "id {:?} via {}", id, element);
        }
    }

    #[tokio::test]
    async fn test_unique_class_ref() {
        let page = SimulatedPage::new("https://example.com");
        page.append(&page.body(), "div", &[("class", "card")]).unwrap();
        let cta = page
            .append(&page.body(), "a", &[("class", "card cta")])
            .unwrap();

        let element = derive_ref(&page, &cta).await.unwrap();
        assert_eq!(element.as_str(), ".card.cta");
        assert_eq!(resolve_ref(&page, &element).await, Some(cta));
    }

    #[tokio::test]
    async fn test_shared_class_falls_back_to_structural_path() {
        let page = SimulatedPage::new("https://example.com");
        let list = page.append(&page.body(), "ul", &[("id", "menu")]).unwrap();
        page.append(&list, "li", &[("class", "item")]).unwrap();
        let second = page.append(&list, "li", &[("class", "item")]).unwrap();

        let element = derive_ref(&page, &second).await.unwrap();
        assert_eq!(element.as_str(), "#menu > li:nth-of-type(2)");
        assert_eq!(resolve_ref(&page, &element).await, Some(second));
    }

    #[tokio::test]
    async fn test_structural_path_to_root() {
        let page = SimulatedPage::new("https://example.com");
        page.append(&page.body(), "div", &[]).unwrap();
        let section = page.append(&page.body(), "div", &[]).unwrap();
        page.append(&section, "p", &[]).unwrap();
        let span = page.append(&section, "span", &[]).unwrap();

        let element = derive_ref(&page, &span).await.unwrap();
        assert_eq!(element.as_str(), "html > body > div:nth-of-type(2) > span");
        assert_eq!(resolve_ref(&page, &element).await, Some(span));
    }

    #[tokio::test]
    async fn test_xpath_fallback_and_not_found() {
        let page = SimulatedPage::new("https://example.com");
        let field = page.append(&page.body(), "input", &[("name", "q")]).unwrap();

        let by_xpath = ElementRef::from("//input[@name='q']");
        assert_eq!(resolve_ref(&page, &by_xpath).await, Some(field));

        assert_eq!(resolve_ref(&page, &ElementRef::from("#missing")).await, None);
        assert_eq!(resolve_ref(&page, &ElementRef::from("//input[text()]")).await, None);
    }
}
