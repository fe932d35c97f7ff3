use gatherd::config::Fragment;
use gatherd::core::parser::{Parser, ScriptParser};
use std::io::Write as _;

fn script_parser(lua: &str) -> Result<ScriptParser, gatherd::GatherError> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(lua.as_bytes()).unwrap();
    let mut frag = Fragment::from_text(
        "s",
        &format!("driver = script\nfile = {}\n", file.path().display()),
    )
    .unwrap();
    // The file must outlive init; the chunk is loaded exactly once there.
    let parser = ScriptParser::from_fragment(&mut frag);
    drop(file);
    parser
}

#[test]
fn test_lua_function_parses_the_body() {
    let parser = script_parser(
        r#"
function parse(body)
    local result = {}
    for key, value in string.gmatch(body, "(%w+)=(%d+)") do
        result[key] = tonumber(value)
    end
    return result
end
"#,
    )
    .unwrap();
    let content = parser.parse(b"hits=10 misses=2").unwrap();
    assert_eq!(content.get("hits"), Some(&10.0));
    assert_eq!(content.get("misses"), Some(&2.0));
}

#[test]
fn test_booleans_and_integers_coerce() {
    let parser = script_parser(
        r#"
function parse(body)
    return { up = true, down = false, count = 3 }
end
"#,
    )
    .unwrap();
    let content = parser.parse(b"").unwrap();
    assert_eq!(content.get("up"), Some(&1.0));
    assert_eq!(content.get("down"), Some(&0.0));
    assert_eq!(content.get("count"), Some(&3.0));
}

#[test]
fn test_missing_parse_function_fails_at_init() {
    assert!(script_parser("answer = 42").is_err());
}

#[test]
fn test_script_error_fails_the_record_not_the_daemon() {
    let parser = script_parser(
        r#"
function parse(body)
    error("refusing this body")
end
"#,
    )
    .unwrap();
    assert!(parser.parse(b"x").is_err());
}

#[test]
fn test_empty_result_table_is_an_error() {
    let parser = script_parser("function parse(body) return {} end").unwrap();
    assert!(parser.parse(b"x").is_err());
}
