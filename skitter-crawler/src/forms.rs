//! HTML form discovery and submit-body synthesis.

use scraper::{ElementRef, Selector};
use url::Url;

use skitter_core::ids;

use crate::types::{DiscoveredForm, FormInput};

/// Extracts a form found on `page_url`. The action resolves against the
/// page; a missing action targets the page itself. Method defaults to GET.
pub fn extract_form(element: ElementRef<'_>, page_url: &Url, session_id: &str) -> DiscoveredForm {
    let action = match element.value().attr("action") {
        Some(a) if !a.is_empty() => page_url
            .join(a)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| page_url.to_string()),
        _ => page_url.to_string(),
    };

    let method = element
        .value()
        .attr("method")
        .map(|m| m.to_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "GET".to_string());

    let mut form = DiscoveredForm {
        id: ids::generate(ids::DEFAULT_LENGTH),
        session_id: session_id.to_string(),
        url: page_url.to_string(),
        action,
        method,
        has_csrf: false,
        inputs: Vec::new(),
    };

    for input in select_inputs(element) {
        let name = match input.value().attr("name") {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => continue,
        };

        let tag = input.value().name();
        let input_type = match tag {
            "select" => "select".to_string(),
            "textarea" => "textarea".to_string(),
            _ => input.value().attr("type").unwrap_or("").to_string(),
        };

        let name_lower = name.to_lowercase();
        if name_lower.contains("csrf")
            || name_lower.contains("token")
            || name_lower.contains("_token")
        {
            form.has_csrf = true;
        }

        form.inputs.push(FormInput {
            name,
            input_type,
            value: input.value().attr("value").unwrap_or("").to_string(),
            required: input.value().attr("required").is_some(),
        });
    }

    form
}

/// Builds the `{name -> value}` pairs a synthetic submission would send.
/// Textareas contribute their text; selects use the `value` attribute
/// verbatim (selected-option resolution is a known limitation).
pub fn extract_form_data(element: ElementRef<'_>) -> Vec<(String, String)> {
    let mut data = Vec::new();

    for input in select_inputs(element) {
        let name = match input.value().attr("name") {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => continue,
        };

        let value = if input.value().name() == "textarea" {
            input.text().collect::<String>()
        } else {
            input.value().attr("value").unwrap_or("").to_string()
        };

        data.push((name, value));
    }

    data
}

fn select_inputs(element: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    let selector = Selector::parse("input, select, textarea").unwrap();
    element.select(&selector).collect::<Vec<_>>().into_iter()
}
