/// Lowercases a domain name and makes it fully qualified.
///
/// The root pattern `.` and the empty string both normalise to `.`.
pub fn to_fqdn(name: &str) -> String {
    let mut fqdn = name.trim().to_ascii_lowercase();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    fqdn
}

/// Yields every proper suffix of a fully-qualified name that starts on a label
/// boundary, longest first. The root label is not included.
///
/// `a.b.example.com.` -> `b.example.com.`, `example.com.`, `com.`
pub fn parent_domains(fqdn: &str) -> impl Iterator<Item = &str> {
    fqdn.match_indices('.')
        .map(move |(idx, _)| &fqdn[idx + 1..])
        .filter(|suffix| !suffix.is_empty())
}
