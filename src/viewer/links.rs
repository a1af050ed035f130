//! Capture-client link building.
//!
//! The mobile capture client is a separate app; the dashboard only assembles
//! the URL that opens it pre-filled for a study (and optionally a
//! participant). QR rendering happens client-side on the links page.

/// Build a capture-client URL for a study.
///
/// Query values are percent-encoded; an existing query string on the base is
/// extended rather than clobbered.
pub fn capture_url(base: &str, study: &str, participant: Option<&str>) -> String {
    let base = base.trim_end_matches(['?', '&']);
    let separator = if base.contains('?') { '&' } else { '?' };

    let mut url = format!("{}{}study={}", base, separator, urlencoding::encode(study));
    if let Some(participant) = participant.filter(|p| !p.is_empty()) {
        url.push_str("&participant=");
        url.push_str(&urlencoding::encode(participant));
    }
    url
}
