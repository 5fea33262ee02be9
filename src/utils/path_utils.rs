/// Transliterates a display name into a safe instance folder name: ASCII
/// alphanumerics are kept (lowercased), everything else becomes `_`.
///
/// Two display names that differ only in punctuation sanitize to the same
/// folder and therefore share an instance directory. Filesystem identity is
/// the sanitized name, not the catalog id.
pub fn sanitize_instance_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
