use gatherd::config::Fragment;
use gatherd::core::parser::{Parser, TextSimpleParser};

fn parser(text: &str) -> TextSimpleParser {
    let mut frag = Fragment::from_text("t", text).unwrap();
    let parser = TextSimpleParser::from_fragment(&mut frag).unwrap();
    frag.finish().unwrap();
    parser
}

#[test]
fn test_key_value_and_colon_and_whitespace_in_key() {
    let p = parser("driver = text_simple\n");
    let content = p
        .parse(b"# c\n;c\nvmstat_us=1.00\nvmstat sys:0.50\n")
        .unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(content.get("vmstat_us"), Some(&1.0));
    assert_eq!(content.get("vmstat.sys"), Some(&0.5));
}

#[test]
fn test_whitespace_separated_pairs() {
    // The mysql batch client emits name<TAB>value rows.
    let p = parser("driver = text_simple\n");
    let content = p.parse(b"Aborted_clients\t10\nThreads_running\t3\n").unwrap();
    assert_eq!(content.get("Aborted_clients"), Some(&10.0));
    assert_eq!(content.get("Threads_running"), Some(&3.0));
}

#[test]
fn test_non_numeric_values_are_skipped() {
    let p = parser("driver = text_simple\n");
    let content = p.parse(b"version=1.2.3\nuptime=42\n").unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content.get("uptime"), Some(&42.0));
}

#[test]
fn test_duplicate_keeps_last() {
    let p = parser("driver = text_simple\n");
    let content = p.parse(b"a=1\na=2\n").unwrap();
    assert_eq!(content.get("a"), Some(&2.0));
    assert_eq!(content.len(), 1);
}

#[test]
fn test_fails_below_minimum_pairs() {
    let p = parser("driver = text_simple\nmin_pairs = 2\n");
    assert!(p.parse(b"a=1\n").is_err());
    assert!(p.parse(b"a=1\nb=2\n").is_ok());
}

#[test]
fn test_empty_input_is_an_error() {
    let p = parser("driver = text_simple\n");
    assert!(p.parse(b"").is_err());
    assert!(p.parse(b"# only comments\n").is_err());
}

#[test]
fn test_key_characters_are_normalized() {
    let p = parser("driver = text_simple\n");
    let content = p.parse(b"cache-hits%=5\n").unwrap();
    assert_eq!(content.get("cache_hits_"), Some(&5.0));
}
