//! Filter document reader and writer
//!
//! ```text
//! <filter/>                                      Empty
//! <filter><tests><test>A</test></tests></filter> Name {A}
//! <filter><cat>A,B</cat></filter>                Category {A, B}
//! <filter><id>0-1001</id></filter>               Id {0-1001}
//! <filter><not><cat>A</cat></not></filter>       Not (Category {A})
//! <filter><cat>A</cat><id>1</id></filter>        And (implicit)
//! ```
//!
//! `<cat>` and `<id>` hold comma-separated lists, so a single value
//! containing a comma does not survive a round trip. Test manifests with
//! such category names are rejected when loaded.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{FilterParseError, TestFilter};
use crate::results::ResultNode;

struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    fn values(&self) -> Vec<String> {
        self.text
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl TestFilter {
    /// Parse a filter document. Blank input is the empty filter.
    pub fn from_xml(xml: &str) -> Result<Self, FilterParseError> {
        if xml.trim().is_empty() {
            return Ok(TestFilter::Empty);
        }
        let root = parse_document(xml)?;
        convert(&root)
    }

    /// Compact XML document for this filter
    pub fn to_xml(&self) -> String {
        self.to_node().to_compact_xml()
    }

    /// The `<filter>` element as a result node
    pub fn to_node(&self) -> ResultNode {
        let filter = ResultNode::new("filter");
        match self {
            TestFilter::Empty => filter,
            other => filter.with_child(element_for(other)),
        }
    }
}

fn element_for(filter: &TestFilter) -> ResultNode {
    match filter {
        TestFilter::Empty => ResultNode::new("filter"),
        TestFilter::Name(names) => {
            let mut tests = ResultNode::new("tests");
            for name in names {
                tests.add_child(ResultNode::new("test").with_text(name.clone()));
            }
            tests
        }
        TestFilter::Category(categories) => list_element("cat", categories),
        TestFilter::Id(ids) => list_element("id", ids),
        TestFilter::And(filters) => composite("and", filters),
        TestFilter::Or(filters) => composite("or", filters),
        TestFilter::Not(inner) => ResultNode::new("not").with_child(element_for(inner)),
    }
}

fn list_element(name: &str, values: &[String]) -> ResultNode {
    let node = ResultNode::new(name);
    if values.is_empty() {
        node
    } else {
        node.with_text(values.join(","))
    }
}

fn composite(name: &str, filters: &[TestFilter]) -> ResultNode {
    let mut node = ResultNode::new(name);
    for filter in filters {
        node.add_child(element_for(filter));
    }
    node
}

fn parse_document(xml: &str) -> Result<Element, FilterParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| FilterParseError::Malformed(e.to_string()))?;

        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(Element::new(name));
            }
            Event::Empty(empty) => {
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                attach(Element::new(name), &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| FilterParseError::Malformed(e.to_string()))?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None => {
                        return Err(FilterParseError::Malformed(format!(
                            "text outside of an element: '{text}'"
                        )))
                    }
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    FilterParseError::Malformed("unbalanced closing tag".to_string())
                })?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(FilterParseError::Malformed("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| FilterParseError::Malformed("no root element".to_string()))
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), FilterParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(FilterParseError::Malformed(
                "more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn convert(element: &Element) -> Result<TestFilter, FilterParseError> {
    match element.name.as_str() {
        "filter" => match element.children.len() {
            0 => Ok(TestFilter::Empty),
            1 => convert(&element.children[0]),
            _ => Ok(TestFilter::And(convert_all(&element.children)?)),
        },
        "and" => Ok(TestFilter::And(convert_all(&element.children)?)),
        "or" => Ok(TestFilter::Or(convert_all(&element.children)?)),
        "not" => match element.children.as_slice() {
            [inner] => Ok(TestFilter::negate(convert(inner)?)),
            children => Err(FilterParseError::NotArity(children.len())),
        },
        "tests" => {
            let mut names = Vec::with_capacity(element.children.len());
            for test in &element.children {
                if test.name != "test" {
                    return Err(FilterParseError::UnknownElement(test.name.clone()));
                }
                names.push(test_name(test)?);
            }
            Ok(TestFilter::Name(names))
        }
        "test" => Ok(TestFilter::Name(vec![test_name(element)?])),
        "cat" => Ok(TestFilter::Category(element.values())),
        "id" => Ok(TestFilter::Id(element.values())),
        other => Err(FilterParseError::UnknownElement(other.to_string())),
    }
}

fn convert_all(elements: &[Element]) -> Result<Vec<TestFilter>, FilterParseError> {
    elements.iter().map(convert).collect()
}

fn test_name(element: &Element) -> Result<String, FilterParseError> {
    let name = element.text.trim();
    if name.is_empty() {
        return Err(FilterParseError::EmptyValue(element.name.clone()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fixtures, TestNode};

    fn selected(filter: &TestFilter, node: &TestNode, out: &mut Vec<String>) {
        if filter.selects(node) {
            out.push(node.id.clone());
        }
        for child in &node.children {
            selected(filter, child, out);
        }
    }

    #[test]
    fn test_empty_filter_document() {
        assert_eq!(TestFilter::Empty.to_xml(), "<filter/>");
        assert_eq!(TestFilter::from_xml("<filter/>").unwrap(), TestFilter::Empty);
        assert_eq!(TestFilter::from_xml("<filter></filter>").unwrap(), TestFilter::Empty);
        assert_eq!(TestFilter::from_xml("  ").unwrap(), TestFilter::Empty);
    }

    #[test]
    fn test_parse_name_filter() {
        let filter = TestFilter::from_xml("<filter><tests><test>X</test></tests></filter>").unwrap();
        assert_eq!(filter, TestFilter::names(["X"]));
    }

    #[test]
    fn test_parse_category_and_not() {
        let filter = TestFilter::from_xml("<filter><not><cat>A, B</cat></not></filter>").unwrap();
        assert_eq!(filter, TestFilter::negate(TestFilter::categories(["A", "B"])));
    }

    #[test]
    fn test_multiple_children_are_and() {
        let filter =
            TestFilter::from_xml("<filter><cat>Fast</cat><id>0-1002,0-1003</id></filter>").unwrap();
        assert_eq!(
            filter,
            TestFilter::And(vec![
                TestFilter::categories(["Fast"]),
                TestFilter::ids(["0-1002", "0-1003"]),
            ])
        );
    }

    #[test]
    fn test_escaped_names() {
        let filter = TestFilter::names(["Suite.Case(\"a<b\")"]);
        let xml = filter.to_xml();
        assert!(xml.contains("&lt;"));
        assert_eq!(TestFilter::from_xml(&xml).unwrap(), filter);
    }

    #[test]
    fn test_round_trip_preserves_selection() {
        let tree = fixtures::tree();
        let filters = vec![
            TestFilter::Empty,
            TestFilter::names(["Root.Math.Add", "Root.Manual"]),
            TestFilter::categories(["Fast"]),
            TestFilter::And(vec![
                TestFilter::categories(["Fast"]),
                TestFilter::negate(TestFilter::categories(["Slow"])),
            ]),
            TestFilter::Or(vec![
                TestFilter::ids(["0-1003"]),
                TestFilter::negate(TestFilter::names(["Root.Math"])),
            ]),
        ];

        for filter in filters {
            let parsed = TestFilter::from_xml(&filter.to_xml()).unwrap();
            let (mut expected, mut actual) = (Vec::new(), Vec::new());
            selected(&filter, &tree, &mut expected);
            selected(&parsed, &tree, &mut actual);
            assert_eq!(expected, actual, "{}", filter.to_xml());
        }
    }

    #[test]
    fn test_malformed_documents_fail() {
        assert!(matches!(
            TestFilter::from_xml("<filter><cat>A</filter>"),
            Err(FilterParseError::Malformed(_))
        ));
        assert!(matches!(
            TestFilter::from_xml("<filter><bogus/></filter>"),
            Err(FilterParseError::UnknownElement(name)) if name == "bogus"
        ));
        assert!(matches!(
            TestFilter::from_xml("<filter><not><cat>A</cat><cat>B</cat></not></filter>"),
            Err(FilterParseError::NotArity(2))
        ));
        assert!(matches!(
            TestFilter::from_xml("<filter><test/></filter>"),
            Err(FilterParseError::EmptyValue(_))
        ));
    }

    #[test]
    fn test_serde_uses_xml_text() {
        let filter = TestFilter::categories(["Fast"]);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, "\"<filter><cat>Fast</cat></filter>\"");
        let back: TestFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
