//! Id-keyed side-channel annotations.
//!
//! Markers carry search results, warnings and provenance without affecting
//! the printed code. They travel with the node on the wire and survive
//! edits that keep the node.

use uuid::Uuid;

/// The marker collection attached to every node. Keyed by marker id;
/// adding a marker with an existing id replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markers {
    entries: Vec<Marker>,
}

impl Markers {
    pub const EMPTY: Markers = Markers {
        entries: Vec::new(),
    };

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.entries.iter()
    }

    pub fn find(&self, id: Uuid) -> Option<&Marker> {
        self.entries.iter().find(|m| m.id == id)
    }

    pub fn add(&mut self, marker: Marker) {
        if let Some(existing) = self.entries.iter_mut().find(|m| m.id == marker.id) {
            *existing = marker;
        } else {
            self.entries.push(marker);
        }
    }

    pub fn push(&mut self, data: MarkerData) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(Marker { id, data });
        id
    }

    /// Equality that ignores marker ids, for print-idempotence comparison
    /// where ids are regenerated on re-parse.
    pub fn same_data(&self, other: &Markers) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|(a, b)| a.data == b.data)
    }
}

impl FromIterator<Marker> for Markers {
    fn from_iter<T: IntoIterator<Item = Marker>>(iter: T) -> Self {
        Markers {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: Uuid,
    pub data: MarkerData,
}

/// Closed set of marker payloads crossing the wire. Opaque to the queues:
/// they ship markers as a single value record and never look inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerData {
    SearchResult { description: Option<String> },
    Warning { message: String },
    Provenance { tool: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_replaces_by_id() {
        let mut markers = Markers::default();
        let id = markers.push(MarkerData::Warning {
            message: "old".into(),
        });
        markers.add(Marker {
            id,
            data: MarkerData::Warning {
                message: "new".into(),
            },
        });
        assert_eq!(markers.len(), 1);
        match &markers.find(id).unwrap().data {
            MarkerData::Warning { message } => assert_eq!(message, "new"),
            other => panic!("unexpected marker data: {other:?}"),
        }
    }

    #[test]
    fn test_same_data_ignores_ids() {
        let mut a = Markers::default();
        a.push(MarkerData::Provenance {
            tool: "worker".into(),
        });
        let mut b = Markers::default();
        b.push(MarkerData::Provenance {
            tool: "worker".into(),
        });
        assert!(a.same_data(&b));
        assert_ne!(a, b);

        b.push(MarkerData::SearchResult { description: None });
        assert!(!a.same_data(&b));
    }
}
