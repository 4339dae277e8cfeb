#![forbid(unsafe_code)]

//! CSS selectors for the fake document, parsed and matched by the
//! `selectors` crate.
//!
//! Everything Level 4 structural matching offers is available: combinators,
//! attribute operators, `:not()`, `:nth-child()` and friends.
//! Non-tree-structural pseudo-classes (`:hover`, `:checked`, ...) and
//! pseudo-elements are not implemented and fail to parse, which the document
//! reports as "no match" the way a content script sees an empty
//! `querySelectorAll` after catching the `SyntaxError`.

use core::fmt;

use cssparser::ToCss;
use precomputed_hash::PrecomputedHash;
use selectors::matching::{
    self, IgnoreNthChildForInvalidation, MatchingContext, MatchingMode, NeedsSelectorFlags,
    QuirksMode,
};
use selectors::parser::{self, ParseRelative, SelectorParseErrorKind};

/// The selector dialect of the fake document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessImpl;

impl parser::SelectorImpl for HarnessImpl {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssName;
    type LocalName = CssName;
    type NamespacePrefix = CssName;
    type NamespaceUrl = CssName;
    type BorrowedNamespaceUrl = CssName;
    type BorrowedLocalName = CssName;
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

/// Attribute value inside a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CssString(pub String);

impl From<&str> for CssString {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for CssString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl ToCss for CssString {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        cssparser::serialize_string(&self.0, dest)
    }
}

/// Identifier, tag name or namespace inside a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CssName(pub String);

impl CssName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CssName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl ToCss for CssName {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        cssparser::serialize_identifier(&self.0, dest)
    }
}

impl PrecomputedHash for CssName {
    /// FNV-1a; only feeds the ancestor bloom filter.
    fn precomputed_hash(&self) -> u32 {
        self.0.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonTSPseudoClass {}

impl parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = HarnessImpl;

    fn is_active_or_hover(&self) -> bool {
        match *self {}
    }

    fn is_user_action_state(&self) -> bool {
        match *self {}
    }
}

impl ToCss for NonTSPseudoClass {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoElement {}

impl parser::PseudoElement for PseudoElement {
    type Impl = HarnessImpl;
}

impl ToCss for PseudoElement {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

struct Parser;

impl<'i> parser::Parser<'i> for Parser {
    type Impl = HarnessImpl;
    type Error = SelectorParseErrorKind<'i>;
}

/// Why a selector failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    pub line: u32,
    pub column: u32,
    pub reason: String,
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.reason, self.line, self.column)
    }
}

impl std::error::Error for SelectorError {}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone)]
pub struct SelectorList(parser::SelectorList<HarnessImpl>);

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut parser_input = cssparser::ParserInput::new(input);
        let mut css = cssparser::Parser::new(&mut parser_input);
        parser::SelectorList::parse(&Parser, &mut css, ParseRelative::No)
            .map(Self)
            .map_err(|err| SelectorError {
                line: err.location.line,
                column: err.location.column,
                reason: format!("{:?}", err.kind),
            })
    }

    /// Number of complex selectors in the list.
    pub fn len(&self) -> usize {
        self.0.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.0.is_empty()
    }

    /// Whether any selector in the list matches `element`.
    pub fn matches<E>(&self, element: &E) -> bool
    where
        E: selectors::Element<Impl = HarnessImpl>,
    {
        let mut caches = Default::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            IgnoreNthChildForInvalidation::No,
        );
        self.0
            .0
            .iter()
            .any(|selector| matching::matches_selector(selector, 0, None, element, &mut context))
    }

    /// Serialized form, normalized by the parser.
    pub fn to_css_string(&self) -> String {
        self.0.to_css_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parses_lists_and_combinators() {
        let list =
            SelectorList::parse(r#"nav.js-repo-nav, nav[aria-label="Repository"] > ul a"#).unwrap();
        assert_eq!(list.len(), 2);
        assert!(!list.is_empty());
    }

    #[test]
    fn accepts_structural_selectors_the_host_uses() {
        for good in [
            "a ~ b",
            "li + li",
            r#"a[href^="/orgA"]"#,
            "a[aria-selected=true i]",
            "a:not(.selected)",
            "li:first-child > a",
        ] {
            assert!(SelectorList::parse(good).is_ok(), "{good:?} should parse");
        }
    }

    #[test]
    fn rejects_invalid_and_stateful_selectors() {
        for bad in ["", "   ", "a:hover", "a::before", "[", "[x=]", ".", "a,,b", "a >"] {
            let err = SelectorList::parse(bad).unwrap_err();
            assert!(!err.to_string().is_empty(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn name_hash_is_stable() {
        assert_eq!(CssName::from("").precomputed_hash(), 0x811c_9dc5);
        assert_eq!(
            CssName::from("selected").precomputed_hash(),
            CssName::from("selected").precomputed_hash()
        );
        assert_ne!(
            CssName::from("selected").precomputed_hash(),
            CssName::from("Selected").precomputed_hash()
        );
    }

    proptest! {
        #[test]
        fn parse_never_panics(input in ".{0,64}") {
            let _ = SelectorList::parse(&input);
        }

        #[test]
        fn class_selectors_parse(class in "[a-zA-Z_][a-zA-Z0-9_-]{0,12}") {
            let list = SelectorList::parse(&format!("div.{class}")).unwrap();
            prop_assert_eq!(list.to_css_string(), format!("div.{class}"));
        }
    }
}
