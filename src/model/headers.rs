//! Case-insensitive, order-preserving header map.

use serde::Serialize;

/// One header field with every value it was given, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    /// Name as first seen on the wire.
    pub name: String,
    pub values: Vec<String>,
}

/// Header block of a single part.
///
/// Lookups ignore ASCII case. Iteration follows the order in which each
/// field name first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|i| self.fields[i].values.first())
            .map(String::as_str)
    }

    /// All values of `name`, empty if absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.fields[i].values,
            None => &[],
        }
    }

    /// All values of `name` joined with `", "`.
    pub fn joined(&self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.fields[i].values.join(", "))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Add a value, keeping any existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.fields[i].values.push(value.into()),
            None => self.fields.push(HeaderField {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.fields[i].values = vec![value.into()],
            None => self.fields.push(HeaderField {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|i| self.fields.remove(i).values)
    }

    /// `(name, value)` for every value of every field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|f| f.values.iter().map(move |v| (f.name.as_str(), v.as_str())))
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut map = HeaderMap::new();
        map.append("Content-Type", "text/xml");
        assert_eq!(map.get("content-type"), Some("text/xml"));
        assert_eq!(map.get("CONTENT-TYPE"), Some("text/xml"));
        assert!(map.get("content-id").is_none());
    }

    #[test]
    fn test_multiple_values_are_kept_and_joined() {
        let map: HeaderMap = [("X-Tag", "a"), ("Content-ID", "<x>"), ("x-tag", "b")]
            .into_iter()
            .collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get_all("X-TAG"), ["a", "b"]);
        assert_eq!(map.joined("x-tag").as_deref(), Some("a, b"));
        let order: Vec<_> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(order, ["X-Tag", "X-Tag", "Content-ID"]);
    }

    #[test]
    fn test_insert_replaces() {
        let mut map = HeaderMap::new();
        map.append("A", "1");
        map.append("A", "2");
        map.insert("a", "3");
        assert_eq!(map.get_all("A"), ["3"]);
        assert_eq!(map.remove("A"), Some(vec!["3".to_string()]));
        assert!(map.is_empty());
    }
}
