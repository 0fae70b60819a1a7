use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub from: String,
    pub to: String,
}

/// Fixed source -> destination paths, matched exactly.
#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    rules: Vec<Redirect>,
}

impl RedirectTable {
    pub fn from_config(redirects: &BTreeMap<String, String>) -> Self {
        let rules = redirects
            .iter()
            .map(|(from, to)| Redirect {
                from: normalize(from).to_string(),
                to: to.clone(),
            })
            .collect();
        Self { rules }
    }

    /// Destination for `path`. One trailing slash on the request is ignored.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        let path = normalize(path);
        self.rules
            .iter()
            .find(|rule| rule.from == path)
            .map(|rule| rule.to.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Redirect> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;

    fn table() -> RedirectTable {
        RedirectTable::from_config(&SiteConfig::default().redirects)
    }

    #[test]
    fn resolves_the_vectors_redirect() {
        let table = table();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.resolve("/articles/freebody/vectors"),
            Some("/articles/vectors")
        );
        assert_eq!(
            table.resolve("/articles/freebody/vectors/"),
            Some("/articles/vectors")
        );
    }

    #[test]
    fn only_exact_paths_match() {
        let table = table();
        assert_eq!(table.resolve("/articles/vectors"), None);
        assert_eq!(table.resolve("/articles/freebody"), None);
        assert_eq!(table.resolve("/articles/freebody/vectors/more"), None);
        assert_eq!(table.resolve("/"), None);
    }
}
