use std::collections::BTreeSet;

/// Names of the fields a read or scan should return. `None` means all fields.
pub type FieldSet = BTreeSet<String>;

/// A keyed unit of data: field name to opaque bytes.
///
/// Field names are unique. Insertion order is kept so that an insert writes
/// fields in the order the caller supplied them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Vec<u8>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set `name` to `value`. An existing field keeps its position and the old
    /// value is returned.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Overlay `patch` onto this record: fields in `patch` replace or extend,
    /// everything else is left untouched.
    pub fn merge(&mut self, patch: &Record) {
        for (name, value) in patch.iter() {
            self.insert(name, value);
        }
    }

    /// Keep only the requested fields that exist in this record.
    pub fn project(self, fields: Option<&FieldSet>) -> Record {
        match fields {
            None => self,
            Some(wanted) => Record {
                fields: self
                    .fields
                    .into_iter()
                    .filter(|(n, _)| wanted.contains(n))
                    .collect(),
            },
        }
    }

    /// Total size of names and values in bytes.
    pub fn byte_len(&self) -> usize {
        self.fields.iter().map(|(n, v)| n.len() + v.len()).sum()
    }
}

impl<K: Into<String>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl<K: Into<String>, V: Into<Vec<u8>>> Extend<(K, V)> for Record {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Vec<u8>);
    type IntoIter = std::vec::IntoIter<(String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> FieldSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut r = Record::from_iter([("a", "1"), ("b", "2")]);
        assert_eq!(r.insert("a", "9"), Some(b"1".to_vec()));
        assert_eq!(r.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(r.get("a"), Some(&b"9"[..]));
    }

    #[test]
    fn merge_leaves_other_fields_alone() {
        let mut r = Record::from_iter([("a", "1"), ("b", "2")]);
        r.merge(&Record::from_iter([("b", "3"), ("c", "4")]));
        assert_eq!(r, Record::from_iter([("a", "1"), ("b", "3"), ("c", "4")]));
    }

    #[test]
    fn projection_drops_unrequested_and_ignores_absent() {
        let r = Record::from_iter([("a", "1"), ("b", "2")]);
        let projected = r.clone().project(Some(&fields(&["b", "zzz"])));
        assert_eq!(projected, Record::from_iter([("b", "2")]));
        assert_eq!(r.clone().project(None), r);
        assert!(r.project(Some(&FieldSet::new())).is_empty());
    }
}
