use net_scout::ports::{default_ports, load_ports_or_default, parse_ports_str};
use std::path::Path;

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # tls-heavy ports
        443
        636  # ldaps
        8443-8445
        8444  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, preserve insertion order of first appearance in each range/line
    assert_eq!(ports, vec![443, 636, 8443, 8444, 8445]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_ports_str("9000-8000\n").is_err());
}

#[test]
fn missing_or_unset_ports_file_uses_defaults() {
    assert_eq!(load_ports_or_default(None), default_ports());
    assert_eq!(
        load_ports_or_default(Some(Path::new("/nonexistent/ports.txt"))),
        default_ports()
    );
}
