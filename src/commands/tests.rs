use super::*;

#[test]
fn snippet_flattens_whitespace() {
    assert_eq!(snippet("one\n\n two\tthree"), "one two three");
}

#[test]
fn snippet_truncates_on_char_boundary() {
    let text = "é".repeat(300);
    let short = snippet(&text);
    assert_eq!(short.chars().count(), 201);
    assert!(short.ends_with('…'));
}
