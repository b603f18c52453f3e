use super::*;

#[test]
fn parse_full_record() {
    let line = r#"{"id":"doc-1","text":"MOSDAC is a satellite data portal.","url":"https://mosdac.gov.in/","title":"Home","tokens":7}"#;
    let document = Document::parse_line(line).expect("record should parse");

    assert_eq!(document.id, "doc-1");
    assert_eq!(document.text, "MOSDAC is a satellite data portal.");
    assert_eq!(document.url.as_deref(), Some("https://mosdac.gov.in/"));
    assert_eq!(document.title.as_deref(), Some("Home"));
}

#[test]
fn parse_record_without_optional_fields() {
    let document =
        Document::parse_line(r#"{"id":"doc-2","text":"Some text"}"#).expect("record should parse");

    assert_eq!(document.url, None);
    assert_eq!(document.title, None);
}

#[test]
fn reject_malformed_json() {
    let result = Document::parse_line(r#"{"id":"doc-3","text":"unterminated"#);
    assert!(matches!(result, Err(DocumentError::Malformed(_))));
}

#[test]
fn reject_missing_text() {
    let result = Document::parse_line(r#"{"id":"doc-4","url":"https://example.com"}"#);
    assert!(matches!(result, Err(DocumentError::Malformed(_))));
}

#[test]
fn reject_blank_fields() {
    assert!(matches!(
        Document::parse_line(r#"{"id":"  ","text":"body"}"#),
        Err(DocumentError::EmptyId)
    ));
    assert!(matches!(
        Document::parse_line(r#"{"id":"doc-5","text":"   \n"}"#),
        Err(DocumentError::EmptyText(id)) if id == "doc-5"
    ));
}

#[test]
fn chunks_carry_parent_metadata() {
    let document = Document {
        id: "doc-6".to_string(),
        text: "First paragraph about INSAT.\n\nSecond paragraph about Oceansat. ".repeat(40),
        url: Some("https://mosdac.gov.in/data".to_string()),
        title: None,
    };
    let config = ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 40,
        ..ChunkingConfig::default()
    };

    let chunks = document.chunk(&config).expect("chunking should succeed");

    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.parent_id, "doc-6");
        assert_eq!(chunk.sequence as usize, i);
        assert_eq!(chunk.metadata, document.metadata());
        assert!(chunk.token_count > 0);
    }
}

#[test]
fn chunk_keys_are_stable() {
    assert_eq!(chunk_key("doc-7", 0), "doc-7-chunk-0");
    assert_eq!(chunk_key("doc-7", 12), "doc-7-chunk-12");

    let document = Document {
        id: "doc-7".to_string(),
        text: "short".to_string(),
        url: None,
        title: None,
    };
    let chunks = document
        .chunk(&ChunkingConfig::default())
        .expect("chunking should succeed");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].key(), "doc-7-chunk-0");
}

#[test]
fn clean_text_strips_links_and_images() {
    assert_eq!(
        clean_text("![logo](x.png) See [INSAT](https://mosdac.gov.in/insat) ## Data"),
        "See INSAT  Data"
    );
    assert_eq!(
        clean_text("[Home](javascript:history.back) [ ](https://mosdac.gov.in/) Catalog"),
        "Catalog"
    );
}

#[test]
fn clean_text_removes_markers_and_blank_runs() {
    assert_eq!(
        clean_text("# Rainfall\n\n\n\n**Daily** estimates from `INSAT-3D`.\n\n"),
        "Rainfall\n\nDaily estimates from INSAT-3D."
    );
    assert_eq!(clean_text("Plain text stays."), "Plain text stays.");
}

#[test]
fn cleaned_document_keeps_metadata() {
    let document = Document {
        id: "doc-8".to_string(),
        text: "## Ocean\n[Winds](https://mosdac.gov.in/winds) from Oceansat-2".to_string(),
        url: Some("https://mosdac.gov.in/ocean".to_string()),
        title: Some("Ocean".to_string()),
    };

    let cleaned = document.cleaned().expect("text remains after cleaning");

    assert_eq!(cleaned.text, "Ocean\nWinds from Oceansat-2");
    assert_eq!(cleaned.metadata(), document.metadata());
}

#[test]
fn markup_only_document_has_no_text() {
    let document = Document {
        id: "doc-9".to_string(),
        text: "![banner](banner.png)\n\n###".to_string(),
        url: None,
        title: None,
    };

    assert!(matches!(
        document.cleaned(),
        Err(DocumentError::EmptyText(id)) if id == "doc-9"
    ));
}

#[test]
fn oversized_counts_saturate() {
    assert_eq!(saturating_u32(7), 7);
    assert_eq!(saturating_u32(u32::MAX as usize), u32::MAX);
    assert_eq!(saturating_u32(usize::MAX), u32::MAX);
}
