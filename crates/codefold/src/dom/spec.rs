use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Serializable description of an element subtree.
///
/// ```json
/// { "tag": "pre", "class": "language-rust", "text": "fn main() {}" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub attrs: IndexMap<String, String>,
    /// Text placed before the children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl Default for ElementSpec {
    fn default() -> Self {
        Self::new("div")
    }
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            class: None,
            attrs: IndexMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    /// A `<pre>` code block with `lines` numbered lines.
    pub fn code_block(language: Option<&str>, lines: usize) -> Self {
        let text = (1..=lines)
            .map(|line| format!("let line_{line} = {line};"))
            .collect::<Vec<_>>()
            .join("\n");
        let spec = Self::new("pre").with_text(&text);
        match language {
            Some(language) => spec.with_class(&format!("language-{language}")),
            None => spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let spec: ElementSpec = serde_json::from_str(r#"{ "text": "hi" }"#).unwrap();
        assert_eq!(spec.tag, "div");
        assert_eq!(spec.text.as_deref(), Some("hi"));
        assert!(spec.children.is_empty());
    }

    #[test]
    fn code_block_has_requested_lines() {
        let spec = ElementSpec::code_block(Some("rust"), 20);
        assert_eq!(spec.text.unwrap().split('\n').count(), 20);
        assert_eq!(spec.class.as_deref(), Some("language-rust"));
    }
}
