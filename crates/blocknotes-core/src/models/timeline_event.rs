/// A relay envelope that passed validation and was sanitized.
///
/// `allowed` is the most recent verdict of the content filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    pub id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub allowed: bool,
}

impl ValidatedEvent {
    /// Number of tags whose name (first element) equals `name`
    pub fn tag_count(&self, name: &str) -> usize {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(name))
            .count()
    }
}
