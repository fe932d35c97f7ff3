use gatherd::config::Fragment;
use gatherd::core::parser::{ApacheParser, NginxParser, Parser, VarnishParser};

fn nginx() -> NginxParser {
    let mut frag = Fragment::from_text("n", "driver = nginx\n").unwrap();
    NginxParser::from_fragment(&mut frag).unwrap()
}

fn apache() -> ApacheParser {
    let mut frag = Fragment::from_text("a", "driver = apache\n").unwrap();
    ApacheParser::from_fragment(&mut frag).unwrap()
}

#[test]
fn test_nginx_stub_status() {
    let input = "Active connections: 7 \nserver accepts handled requests\n 10 10 15 \nReading: 1 Writing: 2 Waiting: 4 \n";
    let content = nginx().parse(input.as_bytes()).unwrap();
    assert_eq!(content.get("connections"), Some(&7.0));
    assert_eq!(content.get("accepts"), Some(&10.0));
    assert_eq!(content.get("handled"), Some(&10.0));
    assert_eq!(content.get("requests"), Some(&15.0));
    assert_eq!(content.get("reading"), Some(&1.0));
    assert_eq!(content.get("writing"), Some(&2.0));
    assert_eq!(content.get("waiting"), Some(&4.0));
}

#[test]
fn test_nginx_rejects_unrelated_text() {
    assert!(nginx().parse(b"<html>hello</html>\n").is_err());
}

#[test]
fn test_apache_status_with_scoreboard() {
    let input = "Total Accesses: 100\nScoreboard: RRWKK\n";
    let content = apache().parse(input.as_bytes()).unwrap();
    assert_eq!(content.get("totalAccesses"), Some(&100.0));
    assert_eq!(content.get("reading"), Some(&2.0));
    assert_eq!(content.get("writing"), Some(&1.0));
    assert_eq!(content.get("waiting"), Some(&2.0));
}

#[test]
fn test_apache_full_auto_output() {
    let input = "Total Accesses: 12\nTotal kBytes: 5\nUptime: 300\nReqPerSec: .04\nBusyWorkers: 1\nIdleWorkers: 9\nScoreboard: _W________....\n";
    let content = apache().parse(input.as_bytes()).unwrap();
    assert_eq!(content.get("totalAccesses"), Some(&12.0));
    assert_eq!(content.get("uptime"), Some(&300.0));
    assert_eq!(content.get("reqPerSec"), Some(&0.04));
    assert_eq!(content.get("busyWorkers"), Some(&1.0));
    assert_eq!(content.get("idleWorkers"), Some(&9.0));
    assert_eq!(content.get("writing"), Some(&1.0));
    assert_eq!(content.get("waiting"), Some(&9.0));
    assert_eq!(content.get("open"), Some(&4.0));
}

#[test]
fn test_varnish_columns() {
    let input = "MAIN.sess_conn            1234          0.12 Sessions accepted\nMAIN.client_req           5678          1.00 Good client requests\n";
    let mut frag = Fragment::from_text("v", "driver = varnish\n").unwrap();
    let parser = VarnishParser::from_fragment(&mut frag).unwrap();
    let content = parser.parse(input.as_bytes()).unwrap();
    assert_eq!(content.get("MAIN.sess_conn"), Some(&1234.0));
    assert_eq!(content.get("MAIN.client_req"), Some(&5678.0));
}
