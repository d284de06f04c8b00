//! CSS selector subset.
//!
//! Supported: type selectors, `*`, `.class`, `[attr]`, `[attr=v]`,
//! `[attr~=v]`, `[attr^=v]`, `[attr$=v]`, `[attr*=v]`, descendant and child
//! combinators, and comma-separated lists. Anything else is a parse error,
//! which is how host patterns the environment cannot evaluate get rejected.

use chumsky::prelude::*;
use smallvec::SmallVec;

use super::Dom;
use crate::error::SelectorError;

type ParseError<'src> = Rich<'src, char, SimpleSpan>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Simple {
    Class(String),
    Attribute {
        name: String,
        test: Option<(AttrOp, String)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Compound {
    /// `None` matches any tag.
    tag: Option<String>,
    simple: SmallVec<[Simple; 4]>,
}

/// One selector of a list: compounds left to right, each paired with the
/// combinator that links it to the previous one.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

fn parser<'src>() -> impl Parser<'src, &'src str, Vec<Complex>, extra::Err<ParseError<'src>>> {
    let ident = any()
        .filter(|character: &char| {
            character.is_ascii_alphanumeric() || *character == '-' || *character == '_'
        })
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|ident: &str| ident.to_string())
        .boxed();

    let quoted = choice((
        just('"')
            .ignore_then(none_of('"').repeated().to_slice())
            .then_ignore(just('"')),
        just('\'')
            .ignore_then(none_of('\'').repeated().to_slice())
            .then_ignore(just('\'')),
    ))
    .map(|value: &str| value.to_string());

    let attr_op = choice((
        just("~=").to(AttrOp::Includes),
        just("^=").to(AttrOp::Prefix),
        just("$=").to(AttrOp::Suffix),
        just("*=").to(AttrOp::Substring),
        just("=").to(AttrOp::Equals),
    ));

    let attribute = just('[')
        .ignore_then(ident.clone().padded_by(text::inline_whitespace()))
        .then(
            attr_op
                .then(quoted.or(ident.clone()).padded_by(text::inline_whitespace()))
                .or_not(),
        )
        .then_ignore(just(']'))
        .map(|(name, test)| Simple::Attribute { name, test });

    let class = just('.').ignore_then(ident.clone()).map(Simple::Class);

    // Outer Option: was a type selector written at all; inner: `*` vs a name
    let tag = choice((
        just('*').to(None),
        ident.map(|name: String| Some(name.to_ascii_lowercase())),
    ));

    let compound = tag
        .or_not()
        .then(choice((class, attribute)).repeated().collect::<Vec<_>>())
        .try_map(|(tag, simple), span| {
            if tag.is_none() && simple.is_empty() {
                return Err(Rich::custom(span, "expected a selector"));
            }
            Ok(Compound {
                tag: tag.flatten(),
                simple: simple.into_iter().collect(),
            })
        })
        .boxed();

    let combinator = choice((
        just('>')
            .padded_by(text::inline_whitespace())
            .to(Combinator::Child),
        text::inline_whitespace()
            .at_least(1)
            .to(Combinator::Descendant),
    ));

    let complex = compound
        .clone()
        .then(combinator.then(compound).repeated().collect::<Vec<_>>())
        .map(|(first, rest)| {
            let mut parts = Vec::with_capacity(rest.len() + 1);
            parts.push((Combinator::Descendant, first));
            parts.extend(rest);
            Complex { parts }
        });

    complex
        .padded_by(text::inline_whitespace())
        .separated_by(just(','))
        .at_least(1)
        .collect::<Vec<_>>()
        .then_ignore(end())
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let alternatives = parser().parse(source).into_result().map_err(|errors| {
            match errors.into_iter().next() {
                Some(error) => SelectorError {
                    message: error.to_string(),
                    start: error.span().start,
                    end: error.span().end,
                },
                None => SelectorError {
                    message: "invalid selector".to_string(),
                    start: 0,
                    end: source.len(),
                },
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// `[name]`, built without going through the parser.
    pub fn has_attribute(name: &str) -> Self {
        Self::single(
            format!("[{name}]"),
            Compound {
                tag: None,
                simple: SmallVec::from_iter([Simple::Attribute {
                    name: name.to_string(),
                    test: None,
                }]),
            },
        )
    }

    /// `.name`, built without going through the parser.
    pub fn class(name: &str) -> Self {
        Self::single(
            format!(".{name}"),
            Compound {
                tag: None,
                simple: SmallVec::from_iter([Simple::Class(name.to_string())]),
            },
        )
    }

    fn single(source: String, compound: Compound) -> Self {
        Self {
            source,
            alternatives: vec![Complex {
                parts: vec![(Combinator::Descendant, compound)],
            }],
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches<D: Dom>(&self, dom: &D, node: &D::Node) -> bool {
        self.alternatives
            .iter()
            .any(|complex| matches_parts(dom, node, &complex.parts))
    }

    /// Matching elements in the subtree of `root`, `root` included, in
    /// document order. Ancestors above `root` still count for combinators.
    pub fn select_all<D: Dom>(&self, dom: &D, root: &D::Node) -> Vec<D::Node> {
        dom.descendants(root)
            .into_iter()
            .filter(|node| self.matches(dom, node))
            .collect()
    }

    /// First match in document order.
    pub fn select_first<D: Dom>(&self, dom: &D, root: &D::Node) -> Option<D::Node> {
        dom.descendants(root)
            .into_iter()
            .find(|node| self.matches(dom, node))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn matches_parts<D: Dom>(dom: &D, node: &D::Node, parts: &[(Combinator, Compound)]) -> bool {
    let Some(((combinator, compound), rest)) = parts.split_last() else {
        return true;
    };
    if !matches_compound(dom, node, compound) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match combinator {
        Combinator::Child => dom
            .parent(node)
            .is_some_and(|parent| matches_parts(dom, &parent, rest)),
        Combinator::Descendant => {
            let mut current = dom.parent(node);
            while let Some(ancestor) = current {
                if matches_parts(dom, &ancestor, rest) {
                    return true;
                }
                current = dom.parent(&ancestor);
            }
            false
        }
    }
}

fn matches_compound<D: Dom>(dom: &D, node: &D::Node, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if dom.tag_name(node) != *tag {
            return false;
        }
    }
    compound.simple.iter().all(|simple| match simple {
        Simple::Class(class) => dom.has_class(node, class),
        Simple::Attribute { name, test } => match (dom.attribute(node, name), test) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some((op, expected))) => attribute_test(&actual, *op, expected),
        },
    })
}

fn attribute_test(actual: &str, op: AttrOp, expected: &str) -> bool {
    match op {
        AttrOp::Equals => actual == expected,
        AttrOp::Includes => actual.split_whitespace().any(|word| word == expected),
        // Empty operands never match for the substring operators
        AttrOp::Prefix => !expected.is_empty() && actual.starts_with(expected),
        AttrOp::Suffix => !expected.is_empty() && actual.ends_with(expected),
        AttrOp::Substring => !expected.is_empty() && actual.contains(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, ElementSpec};

    fn sample() -> Document {
        Document::from_spec(
            &ElementSpec::new("div")
                .with_class("prose")
                .with_child(
                    ElementSpec::new("pre")
                        .with_attr("data-lang", "rust")
                        .with_child(ElementSpec::new("code").with_class("language-rust hl")),
                )
                .with_child(ElementSpec::new("div").with_child(ElementSpec::new("pre"))),
        )
    }

    fn count(document: &Document, selector: &str) -> usize {
        let selector = Selector::parse(selector).unwrap();
        selector.select_all(document, &document.body()).len()
    }

    #[test]
    fn parses_supported_forms() {
        for source in [
            "pre",
            "*",
            ".code-block",
            "[class*=\"language-\"]",
            "[data-lang='rust']",
            "[data-lang=rust]",
            ".prose pre",
            ".prose > pre",
            "pre, code",
            "div.prose>pre[data-lang]",
        ] {
            assert!(Selector::parse(source).is_ok(), "failed to parse {source}");
        }
    }

    #[test]
    fn rejects_unsupported_forms() {
        for source in [".language-*", "", "pre:hover", "[class", "pre >", "a,,b"] {
            assert!(Selector::parse(source).is_err(), "accepted {source:?}");
        }
    }

    #[test]
    fn error_reports_span() {
        let error = Selector::parse(".language-*").unwrap_err();
        assert!(error.start <= 10 && error.end <= ".language-*".len());
    }

    #[test]
    fn matching() {
        let document = sample();
        assert_eq!(count(&document, "pre"), 2);
        assert_eq!(count(&document, ".prose pre"), 2);
        assert_eq!(count(&document, ".prose > pre"), 1);
        assert_eq!(count(&document, "[class*=\"language-\"]"), 1);
        assert_eq!(count(&document, "[class~=hl]"), 1);
        assert_eq!(count(&document, "[data-lang^=ru]"), 1);
        assert_eq!(count(&document, "[data-lang$=st]"), 1);
        assert_eq!(count(&document, "[data-lang^='']"), 0);
        assert_eq!(count(&document, "pre code, pre"), 3);
        assert_eq!(count(&document, "section pre"), 0);
    }

    #[test]
    fn descendant_combinator_sees_ancestors_above_scan_root() {
        let document = sample();
        let body = document.body();
        let prose = document.children(&body)[0];
        let inner_div = document.children(&prose)[1];

        let selector = Selector::parse(".prose pre").unwrap();
        assert_eq!(selector.select_all(&document, &inner_div).len(), 1);
    }

    #[test]
    fn programmatic_selectors() {
        let document = sample();
        let body = document.body();
        assert_eq!(Selector::has_attribute("data-lang").select_all(&document, &body).len(), 1);
        assert_eq!(Selector::class("prose").select_all(&document, &body).len(), 1);
        assert_eq!(Selector::class("prose").source(), ".prose");
    }
}
