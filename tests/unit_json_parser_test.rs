use gatherd::config::Fragment;
use gatherd::core::parser::{JsonParser, Parser};

fn parser() -> JsonParser {
    let mut frag = Fragment::from_text("j", "driver = json\n").unwrap();
    JsonParser::from_fragment(&mut frag).unwrap()
}

#[test]
fn test_flattens_nested_objects_with_dots() {
    let content = parser()
        .parse(br#"{"cpu": {"user": 1.5, "sys": 0.5}, "uptime": 42}"#)
        .unwrap();
    assert_eq!(content.get("cpu.user"), Some(&1.5));
    assert_eq!(content.get("cpu.sys"), Some(&0.5));
    assert_eq!(content.get("uptime"), Some(&42.0));
}

#[test]
fn test_booleans_become_zero_and_one() {
    let content = parser().parse(br#"{"up": true, "degraded": false}"#).unwrap();
    assert_eq!(content.get("up"), Some(&1.0));
    assert_eq!(content.get("degraded"), Some(&0.0));
}

#[test]
fn test_numeric_strings_are_kept_others_skipped() {
    let content = parser()
        .parse(br#"{"rate": "0.25", "name": "web01"}"#)
        .unwrap();
    assert_eq!(content.get("rate"), Some(&0.25));
    assert!(content.get("name").is_none());
}

#[test]
fn test_single_element_numeric_array_survives_joining() {
    let content = parser().parse(br#"{"load": [0.75], "tags": ["a","b"]}"#).unwrap();
    assert_eq!(content.get("load"), Some(&0.75));
    assert!(content.get("tags").is_none());
}

#[test]
fn test_recursion_is_depth_capped() {
    // Eleven levels deep; the leaf sits past the cap and is not descended to.
    let mut doc = String::from("1");
    for i in (0..11).rev() {
        doc = format!("{{\"l{i}\": {doc}}}");
    }
    assert!(parser().parse(doc.as_bytes()).is_err());
}

#[test]
fn test_invalid_json_is_an_error() {
    assert!(parser().parse(b"not json").is_err());
}

#[test]
fn test_document_without_numbers_is_an_error() {
    assert!(parser().parse(br#"{"name": "web01"}"#).is_err());
}
