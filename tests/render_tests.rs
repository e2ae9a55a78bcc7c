//! Integration tests for message projection: bodies, attachments, calendar
//! previews and header handling, driven by fixture messages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use mailview::config::{FilterRule, Identity};
use mailview::model::mail::MessageProjection;
use mailview::render::body;
use mailview::render::html::{HtmlSanitizer, Sanitizer};
use mailview::render::projection::Renderer;
use mailview::service;
use mailview::store::EmlDirectory;

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_dir().join(name)).unwrap()
}

fn me() -> Vec<Identity> {
    vec![Identity {
        name: "Me".into(),
        email: "me@example.org".into(),
    }]
}

fn project(name: &str) -> MessageProjection {
    Renderer::default()
        .with_identities(me())
        .render(&fixture(name), BTreeSet::new(), false)
        .unwrap()
}

// ─── Attachments ────────────────────────────────────────────────────

#[test]
fn test_three_attachments_in_source_order() {
    let p = project("three-attachments.eml");

    let summary: Vec<(&str, &str, u64)> = p
        .attachments
        .iter()
        .map(|a| (a.filename.as_str(), a.content_type.as_str(), a.size_bytes))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("ticket.pdf", "application/pdf", 9),
            ("map.png", "image/png", 8),
            ("notes.txt", "text/plain", 19),
        ]
    );
    assert!(p.attachments.iter().all(|a| a.content.is_none()));
}

#[test]
fn test_inline_text_is_body_not_attachment() {
    let p = project("three-attachments.eml");
    assert!(p.body.plain.contains("Tickets and hotel attached."));
    assert!(p.body.plain.contains("Sent from my phone."));
    assert!(!p.body.plain.contains("Check-in after 3pm."));
    assert!(p.body.html.as_deref().unwrap().contains("<b>hotel</b>"));
}

#[test]
fn test_fetch_through_directory_store() {
    let store = EmlDirectory::new(fixture_dir());
    let renderer = Renderer::default();

    let p = service::fetch_message(&store, &renderer, "three-attachments.eml", true).unwrap();
    assert_eq!(
        p.tags,
        BTreeSet::from(["travel".to_string(), "work".to_string()])
    );
    assert_eq!(p.attachments[0].content.as_deref(), Some(&b"%PDF-1.4\n"[..]));

    let payload =
        service::fetch_attachment(&store, &renderer, "three-attachments.eml", 1).unwrap();
    assert_eq!(payload.filename, "map.png");
    assert_eq!(payload.content_type, "image/png");
    assert_eq!(payload.bytes, b"\x89PNG\r\n\x1a\n");
}

// ─── Calendar ───────────────────────────────────────────────────────

#[test]
fn test_calendar_invitation_preview() {
    let p = project("invite-berlin.eml");
    assert_eq!(p.attachments.len(), 1);
    let invite = &p.attachments[0];
    assert_eq!(invite.content_type, "text/calendar");

    let preview = invite.preview.as_ref().expect("calendar preview");
    assert_eq!(preview.dtstart, "20111101T090000");
    assert_eq!(preview.timezone.as_deref(), Some("Europe/Berlin"));
    assert_eq!(preview.start, "Tue, 01 Nov 2011 09:00");
    assert_eq!(preview.location, "Room 4, 2nd floor");
    assert_eq!(preview.status.as_deref(), Some("TENTATIVE"));
    assert_eq!(
        preview.recurrence_description.as_deref(),
        Some("Every week on Tuesday, 4 times")
    );
    assert_eq!(p.body.plain.trim(), "You have been invited.");
}

#[test]
fn test_truncated_calendar_previews_like_complete_one() {
    let complete = project("invite-berlin.eml");
    let truncated = project("invite-truncated.eml");
    assert!(truncated.attachments[0].preview.is_some());
    assert_eq!(
        truncated.attachments[0].preview,
        complete.attachments[0].preview
    );
}

// ─── Headers ────────────────────────────────────────────────────────

#[test]
fn test_self_referential_in_reply_to_is_dropped() {
    let p = project("self-reply.eml");
    assert_eq!(p.message_id.as_deref(), Some("<self@example.com>"));
    assert!(p.in_reply_to.is_none());
    assert_eq!(p.references.as_deref(), Some("<self@example.com>"));
}

#[test]
fn test_projection_serializes_nulls() {
    let json = serde_json::to_value(project("self-reply.eml")).unwrap();
    assert!(json["in_reply_to"].is_null());
    assert!(json["signature"].is_null());
    assert_eq!(json["subject"], "Re: myself");
    assert_eq!(json["attachments"], serde_json::json!([]));
}

// ─── HTML ───────────────────────────────────────────────────────────

#[test]
fn test_tracking_newsletter_is_sanitized() {
    let p = project("tracking.eml");
    let html = p.body.html.as_deref().unwrap();

    for banned in [
        "<script", "alert(", "onclick", "<iframe", "<style", "<title", "<?xml",
        "javascript:", "track.example.net",
    ] {
        assert!(!html.contains(banned), "{banned} survived: {html}");
    }
    assert!(html.contains(r#"href="https://example.net/story""#));
    assert!(html.contains("cid:logo@example.net"));
    assert!(html.contains("Footer"));
}

#[test]
fn test_html_only_message_gets_plain_text() {
    let p = project("tracking.eml");
    assert!(p.body.plain.contains("Top story"));
    assert!(p.body.plain.contains("Footer"));
    assert!(!p.body.plain.contains("alert"));
    assert!(!p.body.plain.contains('<'));
}

fn html_only(html: &str) -> Vec<u8> {
    format!(
        "From: news@example.net\r\n\
Subject: Newsletter\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
{html}\r\n"
    )
    .into_bytes()
}

#[test]
fn test_remote_attributes_stripped_but_links_kept() {
    let renderer = Renderer::default();
    for markup in [
        r#"<img src="http://t.example/p.gif" alt="x"><a href="https://example.com">y</a>"#,
        r#"<img/src="http://t.example/p.gif" alt="x"><a href="https://example.com">y</a>"#,
        r#"<img src="&#104;ttp://t.example/p.gif" alt="x"><a href="https://example.com">y</a>"#,
    ] {
        let p = renderer
            .render(&html_only(markup), BTreeSet::new(), false)
            .unwrap();
        let html = p.body.html.unwrap();
        assert!(!html.contains("t.example"), "{html} (from {markup})");
        assert!(html.contains(r#"<img alt="x">"#), "{html}");
        assert!(html.contains(r#"href="https://example.com""#), "{html}");
    }
}

#[test]
fn test_header_element_does_not_swallow_plain_text() {
    let p = Renderer::default()
        .render(
            &html_only("<header>Welcome</header><p>Your invoice is ready</p>"),
            BTreeSet::new(),
            false,
        )
        .unwrap();
    assert!(p.body.plain.contains("Welcome"), "{:?}", p.body.plain);
    assert!(p.body.plain.contains("Your invoice is ready"), "{:?}", p.body.plain);
}

/// Uppercases HTML and brackets the raw markup as its text rendering.
struct Shouting;

impl Sanitizer for Shouting {
    fn sanitize(&self, html: &str) -> String {
        html.to_uppercase()
    }

    fn strip_tags(&self, html: &str) -> String {
        format!("[{html}]")
    }
}

#[test]
fn test_custom_filters_and_sanitizer() {
    let rules: BTreeMap<String, Vec<FilterRule>> = [(
        "text/html".to_string(),
        vec![FilterRule {
            pattern: "invoice".into(),
            replacement: "receipt".into(),
        }],
    )]
    .into_iter()
    .collect();
    let renderer = Renderer::default()
        .with_filters(body::ContentFilters::compile(&rules))
        .with_sanitizer(Box::new(Shouting));

    let p = renderer
        .render(&html_only("<p>Your invoice</p>"), BTreeSet::new(), false)
        .unwrap();
    assert_eq!(p.body.html.as_deref().map(str::trim), Some("<P>YOUR RECEIPT</P>"));
    assert!(p.body.plain.starts_with("[<p>Your receipt</p>"), "{:?}", p.body.plain);
    assert!(p.body.plain.ends_with(']'));
}

#[test]
fn test_hostile_markup_never_survives() {
    let sanitizer = HtmlSanitizer::default();
    let samples = [
        "<script>alert(1)</script>ok",
        "<img src=x onerror=alert(1)>",
        "<IFRAME SRC=\"https://evil.example\"></IFRAME>",
        "<div><scr<script>ipt>alert(1)</script></div>",
        "<svg><script>alert(1)</script></svg>",
        "<a href=\"jav&#x09;ascript:alert(1)\">x</a>",
    ];
    for sample in samples {
        let clean = body::clean_html(sample, &sanitizer).to_ascii_lowercase();
        for banned in ["<script", "onerror=", "<iframe", "javascript:"] {
            assert!(!clean.contains(banned), "{banned} in {clean} (from {sample})");
        }
    }
}

#[test]
fn test_body_extraction_is_idempotent() {
    let renderer = Renderer::default();
    let sanitizer = HtmlSanitizer::default();
    for name in ["three-attachments.eml", "tracking.eml", "invite-berlin.eml"] {
        let tree = renderer.parse(&fixture(name)).unwrap();
        let filters = body::ContentFilters::default();
        let first = body::extract(&tree, &filters, &sanitizer);
        let second = body::extract(&tree, &filters, &sanitizer);
        assert_eq!(first, second, "{name}");
        assert!(!first.plain.is_empty(), "{name}");
    }
}
