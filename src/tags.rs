/// Prefix marking catalog tags used for internal classification.
pub(crate) const TAG_MARKER_PREFIX: &str = "__";

/// Keep only marker-prefixed tags, in their original order.
pub(crate) fn filter_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    tags.iter()
        .map(AsRef::as_ref)
        .filter(|tag| tag.starts_with(TAG_MARKER_PREFIX))
        .map(str::to_string)
        .collect()
}
