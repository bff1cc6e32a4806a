//! Heuristic suppression of junk hits.
//!
//! These run after candidate acquisition and before scoring: hits that
//! can't be previewed or that are artifacts of the extraction pipeline
//! (PDF object streams, raw EPUB zip bytes, IPFS directory listings) never
//! reach the ranked results.

use lumen_clients::indexer::{IndexerHit, Tags};

/// Extensions we can still preview when the mime is opaque.
const PREVIEWABLE_EXTS: &[&str] =
    &["pdf", "docx", "epub", "html", "htm", "txt"];

/// Why a hit was suppressed; surfaced only in debug logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Suppression {
    OpaqueBinary,
    PdfObjectStream,
    BrokenPdfPreview,
    EpubZipBytes,
    LowSignalText,
    DirectoryListing,
}

/// Decide whether a hit is kept. Returns the first matching suppression.
pub fn suppress_reason(
    hit: &IndexerHit,
    tags: &Tags,
) -> Option<Suppression> {
    if is_opaque_binary(hit) {
        return Some(Suppression::OpaqueBinary);
    }
    if is_pdf_object_stream(hit, tags) {
        return Some(Suppression::PdfObjectStream);
    }
    if is_broken_pdf_preview(hit, tags) {
        return Some(Suppression::BrokenPdfPreview);
    }
    if is_epub_zip_bytes(hit) {
        return Some(Suppression::EpubZipBytes);
    }
    if is_low_signal_text(hit, tags) {
        return Some(Suppression::LowSignalText);
    }
    if is_directory_listing(hit, tags) {
        return Some(Suppression::DirectoryListing);
    }
    None
}

fn snippet_of(hit: &IndexerHit) -> &str {
    // For text hits the preview is the snippet; otherwise the description.
    if hit.kind.as_deref() == Some("text") {
        hit.preview.as_deref().unwrap_or_default()
    } else {
        hit.description
            .as_deref()
            .or(hit.preview.as_deref())
            .unwrap_or_default()
    }
}

fn ext_of(hit: &IndexerHit) -> Option<String> {
    let from_path = hit
        .path
        .as_deref()
        .and_then(|p| p.rsplit('.').next().map(str::to_ascii_lowercase));
    hit.ext_guess
        .as_deref()
        .map(str::to_ascii_lowercase)
        .or(from_path)
}

/// `application/octet-stream` with no previewable extension hint.
fn is_opaque_binary(hit: &IndexerHit) -> bool {
    if hit.mime.as_deref() != Some("application/octet-stream") {
        return false;
    }
    let previewable = ext_of(hit)
        .is_some_and(|ext| PREVIEWABLE_EXTS.contains(&ext.as_str()))
        || hit.path.as_deref().is_some_and(|p| {
            let p = p.to_ascii_lowercase();
            PREVIEWABLE_EXTS.iter().any(|ext| p.ends_with(ext))
        });
    !previewable
}

/// PDF cross-reference tables and object-stream fragments that leak out of
/// page extraction.
fn is_pdf_object_stream(hit: &IndexerHit, tags: &Tags) -> bool {
    let snippet = snippet_of(hit);
    let marker_in = |s: &str| {
        s.contains("endobj")
            || s.contains("startxref")
            || (s.contains("xref") && s.contains("trailer"))
            || s.contains(" 0 obj")
    };
    if marker_in(snippet) {
        return true;
    }
    // Token histograms dominated by xref machinery.
    let pdf_markers = ["obj", "endobj", "xref", "startxref", "trailer"];
    let marker_hits = pdf_markers
        .iter()
        .filter(|m| tags.tokens.contains_key(**m))
        .count();
    marker_hits >= 3
}

/// Extraction marked failed and nothing meaningful survived.
fn is_broken_pdf_preview(hit: &IndexerHit, tags: &Tags) -> bool {
    let is_pdf = hit.mime.as_deref() == Some("application/pdf")
        || tags.content_class.as_deref() == Some("pdf")
        || ext_of(hit).as_deref() == Some("pdf");
    if !is_pdf {
        return false;
    }
    let failed = hit
        .error
        .as_deref()
        .is_some_and(|e| e.to_ascii_lowercase().contains("extract"));
    let meaningful_tokens =
        tags.tokens.keys().any(|t| t.len() >= 3);
    failed && !meaningful_tokens
}

/// EPUB previews that are raw zip container bytes.
fn is_epub_zip_bytes(hit: &IndexerHit) -> bool {
    let snippet = snippet_of(hit);
    snippet.starts_with("PK")
        || snippet.contains("META-INF/container.xml")
        || snippet.contains("mimetypeapplication/epub+zip")
}

/// Text hits with no path, no title, no snippet, and a histogram dominated
/// by multi-word labels carry no preview signal.
fn is_low_signal_text(hit: &IndexerHit, tags: &Tags) -> bool {
    if hit.kind.as_deref() != Some("text") {
        return false;
    }
    let has_surface = hit.path.is_some()
        || hit.title.is_some()
        || tags.title.is_some()
        || !snippet_of(hit).is_empty();
    if has_surface {
        return false;
    }
    if tags.tokens.is_empty() {
        return true;
    }
    let multiword = tags
        .tokens
        .keys()
        .filter(|t| t.contains(' '))
        .count();
    multiword * 2 > tags.tokens.len()
}

/// IPFS gateway directory listings, by title or by snippet.
fn is_directory_listing(hit: &IndexerHit, tags: &Tags) -> bool {
    if tags.content_class.as_deref() == Some("directory-listing") {
        return true;
    }
    let title = hit
        .title
        .as_deref()
        .or(tags.title.as_deref())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if title.starts_with("index of") || title.contains("/ipfs/") {
        return true;
    }
    let snippet = snippet_of(hit).to_ascii_lowercase();
    snippet.contains("parent directory")
        || (snippet.contains("index of") && snippet.contains("../"))
}

/// Whether a path names an HTML document.
pub fn is_html_path(path: &str) -> bool {
    let p = path.to_ascii_lowercase();
    p.ends_with(".html") || p.ends_with(".htm")
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn hit() -> IndexerHit {
        IndexerHit {
            cid: "c".to_owned(),
            ..Default::default()
        }
    }

    fn tags_with_tokens(keys: &[&str]) -> Tags {
        Tags {
            tokens: keys
                .iter()
                .map(|k| ((*k).to_owned(), 1))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn octet_stream_needs_preview_hint() {
        let mut h = hit();
        h.mime = Some("application/octet-stream".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::OpaqueBinary)
        );

        h.path = Some("/docs/spec.pdf".to_owned());
        assert_eq!(suppress_reason(&h, &Tags::default()), None);

        let mut img = hit();
        img.mime = Some("image/png".to_owned());
        assert_eq!(suppress_reason(&img, &Tags::default()), None);
    }

    #[test]
    fn pdf_xref_fragments_are_dropped() {
        let mut h = hit();
        h.kind = Some("text".to_owned());
        h.preview = Some("3 0 obj << /Type /Page >> endobj".to_owned());
        h.path = Some("/x".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::PdfObjectStream)
        );

        let tags =
            tags_with_tokens(&["obj", "endobj", "xref", "trailer"]);
        assert_eq!(
            suppress_reason(&hit(), &tags),
            Some(Suppression::PdfObjectStream)
        );
    }

    #[test]
    fn broken_pdf_needs_failure_and_empty_tokens() {
        let mut h = hit();
        h.mime = Some("application/pdf".to_owned());
        h.error = Some("text extraction failed".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::BrokenPdfPreview)
        );

        // meaningful tokens rescue it
        let tags = tags_with_tokens(&["quantum", "networks"]);
        assert_eq!(suppress_reason(&h, &tags), None);
    }

    #[test]
    fn epub_zip_bytes_are_dropped() {
        let mut h = hit();
        h.kind = Some("text".to_owned());
        h.path = Some("/book.epub".to_owned());
        h.preview = Some("PK\u{3}\u{4}...".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::EpubZipBytes)
        );
    }

    #[test]
    fn low_signal_text_is_dropped() {
        let mut h = hit();
        h.kind = Some("text".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::LowSignalText)
        );

        let tags = tags_with_tokens(&["label one", "label two", "x"]);
        assert_eq!(
            suppress_reason(&h, &tags),
            Some(Suppression::LowSignalText)
        );

        // a title gives it enough surface to keep
        let mut titled = h.clone();
        titled.title = Some("notes".to_owned());
        assert_eq!(suppress_reason(&titled, &Tags::default()), None);
    }

    #[test]
    fn directory_listings_are_dropped() {
        let mut h = hit();
        h.title = Some("Index of /ipfs/bafyfoo".to_owned());
        assert_eq!(
            suppress_reason(&h, &Tags::default()),
            Some(Suppression::DirectoryListing)
        );

        let tags = Tags {
            content_class: Some("directory-listing".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            suppress_reason(&hit(), &tags),
            Some(Suppression::DirectoryListing)
        );
    }

    #[test]
    fn html_path_check() {
        assert!(is_html_path("/index.html"));
        assert!(is_html_path("/a/B.HTM"));
        assert!(!is_html_path("/photo.png"));
        assert!(!is_html_path("index.html.bak"));
    }
}
