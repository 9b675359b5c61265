//! Filenames for downloadable responses: Content-Disposition parsing,
//! synthesized fallbacks, and safe paths for saving.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// Extracts the raw (still percent-encoded) filename from a Content-Disposition value.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example%20file.pdf` (RFC 5987, preferred)
pub(crate) fn disposition_filename(header: &str) -> Option<String> {
    // ASCII lower-casing keeps byte offsets aligned with `header`.
    let lowered = header.to_ascii_lowercase();

    if let Some(pos) = lowered.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim_start();
        let value = value.split(';').next().unwrap_or_default().trim();
        // charset'language'encoded-value
        let encoded = value.find("''").map_or(value, |quotes| &value[quotes + 2..]);
        let encoded = encoded.trim_matches('"');
        if !encoded.is_empty() {
            return Some(encoded.to_string());
        }
    }

    let pos = lowered.find("filename=")?;
    let value = header[pos + "filename=".len()..].trim_start();
    let name = if let Some(quoted) = value.strip_prefix('"') {
        quoted.split('"').next().unwrap_or_default()
    } else {
        value.split(';').next().unwrap_or_default().trim()
    };
    (!name.is_empty()).then(|| name.to_string())
}

/// Form-decodes a filename (`+` is a space, then percent escapes), keeping
/// the raw value when it does not decode to UTF-8.
///
/// This is the inverse of the encoding applied to upload filenames.
pub(crate) fn decode_filename(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(error) => {
            warn!(filename = raw, %error, "could not decode filename, using it verbatim");
            raw.to_string()
        }
    }
}

/// Filename for a file response of `media_type` (already lower-cased, parameters stripped).
///
/// - no disposition or empty name: `<uuid>.<subtype>`
/// - name starting with a dot (`.pdf`): `<uuid>.pdf`
/// - name without any dot: `<name>.<subtype>`
/// - anything else is kept as sent
pub(crate) fn resolve_filename(disposition: Option<&str>, media_type: &str) -> String {
    let subtype = media_type
        .split_once('/')
        .map_or(media_type, |(_, subtype)| subtype);
    let name = disposition
        .and_then(disposition_filename)
        .map(|raw| decode_filename(&raw))
        .filter(|name| !name.trim().is_empty());

    match name {
        None => format!("{}.{subtype}", Uuid::new_v4()),
        Some(name) if name.starts_with('.') => format!("{}{name}", Uuid::new_v4()),
        Some(name) if !name.contains('.') => format!("{name}.{subtype}"),
        Some(name) => name,
    }
}

/// Replaces characters that are invalid on common filesystems with `_`.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim_matches(['_', '.']).is_empty() || !is_plain_segment(&sanitized) {
        return "download.bin".to_string();
    }
    sanitized
}

/// `dir/name`, or `dir/stem_N.ext` for the first free `N` when `name` is taken.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = sanitize_filename(filename);
    let base = dir.join(&filename);
    if !base.exists() {
        return base;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };
    (1..)
        .map(|i| dir.join(format!("{stem}_{i}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}

fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn is_uuid_prefixed(name: &str, suffix: &str) -> bool {
        name.strip_suffix(suffix)
            .is_some_and(|stem| Uuid::parse_str(stem).is_ok())
    }

    // ==================== Content-Disposition ====================

    #[test]
    fn test_disposition_quoted() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="report.pdf""#),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn test_disposition_unquoted_with_trailing_param() {
        assert_eq!(
            disposition_filename("attachment; filename=report.pdf; size=10"),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn test_disposition_prefers_rfc5987() {
        let header = r#"attachment; filename="fallback.pdf"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"#;
        let raw = disposition_filename(header).unwrap();
        assert_eq!(raw, "r%C3%A9sum%C3%A9.pdf");
        assert_eq!(decode_filename(&raw), "résumé.pdf");
    }

    #[test]
    fn test_disposition_parameter_name_is_case_insensitive() {
        assert_eq!(
            disposition_filename("inline; FileName=scan.png"),
            Some("scan.png".to_string())
        );
    }

    #[test]
    fn test_disposition_without_filename() {
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(disposition_filename(r#"attachment; filename="""#), None);
    }

    #[test]
    fn test_decode_failure_keeps_raw_value() {
        assert_eq!(decode_filename("bad%FF.pdf"), "bad%FF.pdf");
        assert_eq!(decode_filename("a%20b.jpg"), "a b.jpg");
        assert_eq!(decode_filename("bad+%FF.pdf"), "bad+%FF.pdf");
    }

    #[test]
    fn test_decode_treats_plus_as_space() {
        assert_eq!(decode_filename("a+b.jpg"), "a b.jpg");
        assert_eq!(decode_filename("1%2B1.txt"), "1+1.txt");
        assert_eq!(decode_filename("q3+report%2C+final.pdf"), "q3 report, final.pdf");
    }

    #[test]
    fn test_decode_inverts_upload_encoding() {
        for name in ["a b.jpg", "1+1 = 2.txt", "résumé (final).pdf", "plain.txt"] {
            let encoded = crate::dispatch::encode_upload_filename(name);
            assert_eq!(decode_filename(&encoded), name, "encoded as {encoded}");
        }
    }

    // ==================== Filename resolution ====================

    #[test]
    fn test_resolve_without_disposition_synthesizes_name() {
        let name = resolve_filename(None, "application/pdf");
        assert!(is_uuid_prefixed(&name, ".pdf"), "got: {name}");
    }

    #[test]
    fn test_resolve_extension_only_gets_uuid_prefix() {
        let name = resolve_filename(Some("attachment; filename=.pdf"), "application/pdf");
        assert!(is_uuid_prefixed(&name, ".pdf"), "got: {name}");
    }

    #[test]
    fn test_resolve_name_without_dot_gets_subtype() {
        let name = resolve_filename(Some(r#"attachment; filename="invoice""#), "application/msword");
        assert_eq!(name, "invoice.msword");
    }

    #[test]
    fn test_resolve_keeps_complete_name() {
        let name = resolve_filename(Some("attachment; filename=a%20b.jpg"), "image/jpeg");
        assert_eq!(name, "a b.jpg");
    }

    #[test]
    fn test_resolve_blank_name_is_synthesized() {
        let name = resolve_filename(Some("attachment; filename=\"  \""), "image/png");
        assert!(is_uuid_prefixed(&name, ".png"), "got: {name}");
    }

    // ==================== Saving ====================

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(sanitize_filename("a/b\\c:d.pdf"), "a_b_c_d.pdf");
        assert_eq!(sanitize_filename(".."), "download.bin");
        assert_eq!(sanitize_filename(""), "download.bin");
    }

    #[test]
    fn test_resolve_unique_path_adds_suffix() {
        let dir = TempDir::new().unwrap();
        let first = resolve_unique_path(dir.path(), "scan.pdf");
        assert_eq!(first, dir.path().join("scan.pdf"));
        std::fs::write(&first, b"x").unwrap();

        let second = resolve_unique_path(dir.path(), "scan.pdf");
        assert_eq!(second, dir.path().join("scan_1.pdf"));
        std::fs::write(&second, b"x").unwrap();

        assert_eq!(
            resolve_unique_path(dir.path(), "scan.pdf"),
            dir.path().join("scan_2.pdf")
        );
    }

    #[test]
    fn test_resolve_unique_path_stays_in_dir() {
        let dir = TempDir::new().unwrap();
        let path = resolve_unique_path(dir.path(), "../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
