//! Derivation of safe Kubernetes names from arbitrary text such as file
//! names or URL hosts.

/// Convert text into a usable Kubernetes resource name: lower case ASCII
/// alphanumerics separated by single hyphens, without leading or trailing
/// hyphens.
pub fn convert_to_safe_resource_name(text: &str) -> String {
    let mut name = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars().map(|c| c.to_ascii_lowercase()) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_separator && !name.is_empty() {
                name.push('-');
            }
            pending_separator = false;
            name.push(ch);
        } else {
            pending_separator = true;
        }
    }
    name
}

/// Convert text into a usable Kubernetes label value. Case is kept, and
/// `-`, `_` and `.` are allowed anywhere but at the ends.
pub fn convert_to_safe_label_value(text: &str) -> String {
    let mut value = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !value.is_empty() {
                value.push('-');
            }
            pending_separator = false;
            value.push(ch);
        } else if matches!(ch, '-' | '_' | '.') && !value.is_empty() && !pending_separator {
            value.push(ch);
        } else {
            pending_separator = true;
        }
    }
    while value.ends_with(['-', '_', '.']) {
        value.pop();
    }
    value
}
