/// Lowercase keyword tokens, in configured order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keywords(Vec<String>);

impl Keywords {
    /// Split a phrase on whitespace and lowercase each token.
    pub fn parse(phrase: &str) -> Self {
        Self(phrase.split_whitespace().map(str::to_lowercase).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(index, keyword)` for every keyword contained in `text`, ignoring case.
    ///
    /// Plain substring containment: "moon" matches "Honeymoon".
    pub fn matches<'a>(&'a self, text: &str) -> Vec<(usize, &'a str)> {
        let haystack = text.to_lowercase();
        self.0
            .iter()
            .enumerate()
            .filter(|(_, kw)| haystack.contains(kw.as_str()))
            .map(|(i, kw)| (i, kw.as_str()))
            .collect()
    }
}
