//! Explicit locator hints (`xpath=`, `css=`, `id=`, ...).

use super::{css_value, xpath_literal, Locator};

/// Kind of explicit hint a target may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    XPath,
    Css,
    Id,
    /// Anchor whose text equals the value.
    Link,
    /// Anchor whose text contains the value.
    PartialLink,
    /// Anchor whose href contains the value.
    Href,
}

const PREFIXES: &[(&str, HintKind)] = &[
    ("xpath=", HintKind::XPath),
    ("css=", HintKind::Css),
    ("id=", HintKind::Id),
    ("link=", HintKind::Link),
    ("partiallink=", HintKind::PartialLink),
    ("href=", HintKind::Href),
];

/// A parsed explicit hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub kind: HintKind,
    pub value: String,
}

impl Hint {
    /// Parse a hint prefix. Prefix names are case-insensitive; a bare
    /// `//...` or `(//...)` expression is taken as XPath.
    pub fn parse(target: &str) -> Option<Self> {
        let t = target.trim();
        for (prefix, kind) in PREFIXES {
            if t.len() > prefix.len()
                && t.is_char_boundary(prefix.len())
                && t[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                let value = t[prefix.len()..].trim();
                if value.is_empty() {
                    return None;
                }
                return Some(Self {
                    kind: *kind,
                    value: value.to_string(),
                });
            }
        }
        if t.starts_with("//") || t.starts_with("(//") {
            return Some(Self {
                kind: HintKind::XPath,
                value: t.to_string(),
            });
        }
        None
    }

    /// The single locator this hint stands for.
    pub fn locator(&self) -> Locator {
        let v = &self.value;
        match self.kind {
            HintKind::XPath => Locator::XPath(v.clone()),
            HintKind::Css => Locator::Css(v.clone()),
            HintKind::Id => Locator::Css(format!("[id=\"{}\"]", css_value(v))),
            HintKind::Link => {
                Locator::XPath(format!("//a[normalize-space(.)={}]", xpath_literal(v)))
            }
            HintKind::PartialLink => Locator::XPath(format!(
                "//a[contains(normalize-space(.), {})]",
                xpath_literal(v)
            )),
            HintKind::Href => Locator::Css(format!("a[href*=\"{}\"]", css_value(v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_prefix() {
        assert_eq!(Hint::parse("xpath=//div").unwrap().kind, HintKind::XPath);
        assert_eq!(Hint::parse("css=.btn").unwrap().kind, HintKind::Css);
        assert_eq!(Hint::parse("id=submit").unwrap().kind, HintKind::Id);
        assert_eq!(Hint::parse("link=Home").unwrap().kind, HintKind::Link);
        assert_eq!(
            Hint::parse("partialLink=Hom").unwrap().kind,
            HintKind::PartialLink
        );
        assert_eq!(Hint::parse("href=/settings").unwrap().kind, HintKind::Href);
    }

    #[test]
    fn prefix_is_case_insensitive() {
        let hint = Hint::parse("XPath=//button").unwrap();
        assert_eq!(hint.kind, HintKind::XPath);
        assert_eq!(hint.value, "//button");
    }

    #[test]
    fn bare_xpath_is_a_hint() {
        let hint = Hint::parse("(//button)[2]").unwrap();
        assert_eq!(hint.locator(), Locator::XPath("(//button)[2]".into()));
    }

    #[test]
    fn plain_text_is_not_a_hint() {
        assert!(Hint::parse("Sign In").is_none());
        assert!(Hint::parse("css=").is_none());
        assert!(Hint::parse("identity").is_none());
    }

    #[test]
    fn hint_locators() {
        assert_eq!(
            Hint::parse("id=main-nav").unwrap().locator(),
            Locator::Css("[id=\"main-nav\"]".into())
        );
        assert_eq!(
            Hint::parse("link=Docs").unwrap().locator(),
            Locator::XPath("//a[normalize-space(.)='Docs']".into())
        );
        assert_eq!(
            Hint::parse("href=/billing").unwrap().locator(),
            Locator::Css("a[href*=\"/billing\"]".into())
        );
    }
}
