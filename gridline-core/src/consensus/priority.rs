use serde::{Deserialize, Serialize};

/// Ordered source preference used to pick descriptive fields when sources disagree.
///
/// Sources not listed rank after every listed one, alphabetically among themselves.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePriority {
    order: Vec<String>,
}

impl SourcePriority {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            order: order.into_iter().map(Into::into).collect(),
        }
    }

    /// Sort key for a source: (position in list or len, name).
    pub fn rank<'a>(&self, source: &'a str) -> (usize, &'a str) {
        let pos = self
            .order
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.order.len());
        (pos, source)
    }

    pub fn sources(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_sources_rank_first() {
        let p = SourcePriority::new(["pinnacle", "betonline"]);
        let mut sources = vec!["zeta", "betonline", "alpha", "pinnacle"];
        sources.sort_by_key(|s| p.rank(*s));
        assert_eq!(sources, vec!["pinnacle", "betonline", "alpha", "zeta"]);
    }
}
