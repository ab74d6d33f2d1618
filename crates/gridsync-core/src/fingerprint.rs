//! Content fingerprints for change detection.
//!
//! A [`Fingerprint`] is a SHA-256 digest over a canonical encoding of the
//! cell table of a [`GridSnapshot`]. Only cell content participates: the
//! fetch timestamp, the server-reported hash, geometry and the type
//! catalogue are excluded, so two snapshots with equal cells always share
//! a fingerprint no matter how or when they were fetched.
//!
//! The encoding walks cells in row-major id order and length-prefixes every
//! variable-width field, so neither map insertion order nor concatenation
//! ambiguities can produce a false match.

use std::fmt;

use gridsync_types::{AttributeValue, Cell, CellId, GridSnapshot};
use sha2::{Digest, Sha256};

/// Version tag mixed into every digest. Bump when the encoding changes.
const ENCODING_TAG: &[u8] = b"gridsync.cells.v1";

/// SHA-256 digest of a snapshot's cell content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// The raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut out = self.to_string();
        out.truncate(8);
        out
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Compute the fingerprint of a snapshot's cells.
pub fn fingerprint(snapshot: &GridSnapshot) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(ENCODING_TAG);
    hasher.update((snapshot.len() as u64).to_le_bytes());
    for (id, cell) in snapshot.cells() {
        encode_cell(&mut hasher, *id, cell);
    }
    Fingerprint(hasher.finalize().into())
}

/// Whether `current` differs from the last accepted fingerprint.
///
/// With no accepted fingerprint every snapshot counts as changed.
pub fn has_changed(accepted: Option<&Fingerprint>, current: &Fingerprint) -> bool {
    accepted != Some(current)
}

fn encode_cell(hasher: &mut Sha256, id: CellId, cell: &Cell) {
    hasher.update(id.row.to_le_bytes());
    hasher.update(id.col.to_le_bytes());
    encode_str(hasher, &cell.type_name);
    hasher.update(canonical_bits(cell.height).to_le_bytes());
    match cell.color {
        Some(rgba) => {
            hasher.update([1]);
            hasher.update(rgba);
        }
        None => hasher.update([0]),
    }
    hasher.update([u8::from(cell.interactive)]);
    hasher.update((cell.attributes.len() as u64).to_le_bytes());
    for (key, value) in &cell.attributes {
        encode_str(hasher, key);
        match value {
            AttributeValue::Number(n) => {
                hasher.update([b'n']);
                hasher.update(canonical_bits(*n).to_le_bytes());
            }
            AttributeValue::Flag(b) => {
                hasher.update([b'f', u8::from(*b)]);
            }
            AttributeValue::Category(s) => {
                hasher.update([b's']);
                encode_str(hasher, s);
            }
        }
    }
}

fn encode_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Bit pattern of a float with `-0.0` folded into `0.0` and every NaN
/// folded into one payload.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// Result of comparing a fetched snapshot against the accepted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Fingerprint of the fetched snapshot.
    pub fingerprint: Fingerprint,
    /// Whether it differs from the accepted fingerprint.
    pub changed: bool,
}

/// Tracks the fingerprint of the last accepted snapshot.
///
/// Observing never moves the accepted fingerprint. Only [`accept`] does,
/// which the handler calls after a pass has been pushed in full. A failed
/// pass therefore leaves the previous fingerprint in place and the next
/// poll sees the same snapshot as changed again.
///
/// [`accept`]: ChangeDetector::accept
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    accepted: Option<Fingerprint>,
}

impl ChangeDetector {
    /// A detector with nothing accepted yet.
    pub const fn new() -> Self {
        Self { accepted: None }
    }

    /// The last accepted fingerprint.
    pub const fn accepted(&self) -> Option<&Fingerprint> {
        self.accepted.as_ref()
    }

    /// Fingerprint `snapshot` and compare it with the accepted state.
    pub fn observe(&self, snapshot: &GridSnapshot) -> Observation {
        let fingerprint = fingerprint(snapshot);
        Observation {
            fingerprint,
            changed: has_changed(self.accepted.as_ref(), &fingerprint),
        }
    }

    /// Record `fingerprint` as accepted.
    pub const fn accept(&mut self, fingerprint: Fingerprint) {
        self.accepted = Some(fingerprint);
    }

    /// Put back the fingerprint accepted before a failed pass. `None` means
    /// nothing has been accepted, so every snapshot counts as changed.
    pub const fn restore(&mut self, previous: Option<Fingerprint>) {
        self.accepted = previous;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use gridsync_types::{CellGeometry, GridHeader, GridMetadata, TypeDefinition};

    use super::*;

    fn snapshot(cells: &[(u32, u32, &str, f64)]) -> GridSnapshot {
        GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(4, 4)),
            cells
                .iter()
                .map(|(r, c, t, h)| (CellId::new(*r, *c), Cell::of_type(*t).with_height(*h))),
        )
        .unwrap()
    }

    #[test]
    fn identical_content_same_fingerprint() {
        let a = snapshot(&[(0, 0, "Park", 1.0), (1, 2, "Office", 3.0)]);
        let b = snapshot(&[(1, 2, "Office", 3.0), (0, 0, "Park", 1.0)]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn metadata_and_side_tables_ignored() {
        let a = snapshot(&[(0, 0, "Park", 1.0)]);
        let mut b = a.clone();
        b.metadata.server_hash = Some("abc".to_owned());
        b.metadata.fetched_at = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        let mut geometry = BTreeMap::new();
        geometry.insert(CellId::new(0, 0), CellGeometry { ring: vec![[0.0, 0.0]] });
        let mut types = BTreeMap::new();
        types.insert("Park".to_owned(), TypeDefinition::default());
        let b = b.with_geometry(geometry).with_type_definitions(types);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn any_cell_edit_changes_fingerprint() {
        let base = snapshot(&[(0, 0, "Park", 1.0)]);
        let edits = [
            snapshot(&[(0, 0, "Office", 1.0)]),
            snapshot(&[(0, 0, "Park", 2.0)]),
            snapshot(&[(0, 1, "Park", 1.0)]),
            snapshot(&[(0, 0, "Park", 1.0), (0, 1, "Park", 1.0)]),
        ];
        let base_fp = fingerprint(&base);
        for edited in &edits {
            assert_ne!(fingerprint(edited), base_fp);
        }

        let mut attributed = base;
        let cell = Cell::of_type("Park")
            .with_height(1.0)
            .with_attribute("pop", AttributeValue::Number(10.0));
        attributed.set_cell(CellId::new(0, 0), cell).unwrap();
        assert_ne!(fingerprint(&attributed), base_fp);
    }

    #[test]
    fn negative_zero_height_matches_zero() {
        let a = snapshot(&[(0, 0, "Park", 0.0)]);
        let b = snapshot(&[(0, 0, "Park", -0.0)]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn type_name_boundaries_are_unambiguous() {
        let mut a = snapshot(&[]);
        a.insert_cell(
            CellId::new(0, 0),
            Cell::of_type("ab").with_attribute("c", AttributeValue::Flag(true)),
        )
        .unwrap();
        let mut b = snapshot(&[]);
        b.insert_cell(
            CellId::new(0, 0),
            Cell::of_type("a").with_attribute("bc", AttributeValue::Flag(true)),
        )
        .unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn display_is_lowercase_hex() {
        let fp = fingerprint(&snapshot(&[]));
        let text = fp.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short().len(), 8);
    }

    #[test]
    fn detector_only_moves_on_accept() {
        let mut detector = ChangeDetector::new();
        let snap = snapshot(&[(0, 0, "Park", 1.0)]);

        let first = detector.observe(&snap);
        assert!(first.changed);
        assert!(detector.observe(&snap).changed);

        detector.accept(first.fingerprint);
        assert!(!detector.observe(&snap).changed);
        assert!(!has_changed(detector.accepted(), &first.fingerprint));
    }

    #[test]
    fn restore_puts_back_previous_fingerprint() {
        let mut detector = ChangeDetector::new();
        let old = snapshot(&[(0, 0, "Park", 1.0)]);
        let new = snapshot(&[(0, 0, "Office", 1.0)]);
        let old_fp = detector.observe(&old).fingerprint;
        detector.accept(old_fp);

        detector.accept(detector.observe(&new).fingerprint);
        detector.restore(Some(old_fp));
        assert_eq!(detector.accepted(), Some(&old_fp));
        assert!(detector.observe(&new).changed);
        assert!(!detector.observe(&old).changed);

        detector.restore(None);
        assert!(detector.accepted().is_none());
        assert!(detector.observe(&old).changed);
    }
}
