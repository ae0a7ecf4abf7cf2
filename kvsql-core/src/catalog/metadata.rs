//! Serialization of schema definitions into KV storage option payloads.
//!
//! Each index is stored as one KV storage whose opaque options payload holds
//! the serialized definition: a primary index carries the full table
//! definition alongside it (so recovery can rebuild tables without a second
//! source), a secondary carries the index alone and references its owning
//! table by name. Payloads are version-tagged bitcode blobs.

use bitcode::{Decode, Encode};
use kvsql_plan::{IndexDef, TableDef};
use kvsql_result::{Error, Result};

/// Current payload format version.
pub const METADATA_FORMAT_VERSION: u32 = 1;

#[derive(Encode, Decode)]
struct StoredDefinition {
    version: u32,
    /// Present when the index is a primary ("table definition" payload).
    table: Option<TableDef>,
    index: IndexDef,
}

/// Serialize an index definition (plus the table definition for primaries).
pub fn encode_index_payload(table: Option<&TableDef>, index: &IndexDef) -> Vec<u8> {
    bitcode::encode(&StoredDefinition {
        version: METADATA_FORMAT_VERSION,
        table: table.cloned(),
        index: index.clone(),
    })
}

/// Deserialize a payload produced by [`encode_index_payload`].
pub fn decode_index_payload(bytes: &[u8]) -> Result<(Option<TableDef>, IndexDef)> {
    let stored: StoredDefinition = bitcode::decode(bytes).map_err(|err| {
        Error::InvalidState(format!("failed to decode index definition payload: {err}"))
    })?;
    if stored.version != METADATA_FORMAT_VERSION {
        return Err(Error::InvalidState(format!(
            "unsupported index definition payload version {} (expected {})",
            stored.version, METADATA_FORMAT_VERSION
        )));
    }
    Ok((stored.table, stored.index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsql_plan::{ColumnDef, IndexKey, SqlType};

    fn sample_table() -> TableDef {
        TableDef {
            name: "t".into(),
            definition_id: Some(42),
            columns: vec![
                ColumnDef {
                    name: "c0".into(),
                    sql_type: SqlType::Int8,
                    nullable: false,
                },
                ColumnDef {
                    name: "c1".into(),
                    sql_type: SqlType::text(),
                    nullable: true,
                },
            ],
        }
    }

    #[test]
    fn test_primary_payload_round_trip() {
        let table = sample_table();
        let index = IndexDef {
            name: "t".into(),
            table: "t".into(),
            definition_id: 43,
            keys: vec![IndexKey::ascending("c0")],
            values: vec!["c1".into()],
            primary: true,
        };
        let payload = encode_index_payload(Some(&table), &index);
        let (decoded_table, decoded_index) = decode_index_payload(&payload).unwrap();
        assert_eq!(decoded_table.as_ref(), Some(&table));
        assert_eq!(decoded_index, index);
    }

    #[test]
    fn test_secondary_payload_has_no_table() {
        let index = IndexDef {
            name: "t_c1".into(),
            table: "t".into(),
            definition_id: 44,
            keys: vec![IndexKey::ascending("c1")],
            values: vec![],
            primary: false,
        };
        let payload = encode_index_payload(None, &index);
        let (decoded_table, decoded_index) = decode_index_payload(&payload).unwrap();
        assert!(decoded_table.is_none());
        assert_eq!(decoded_index, index);
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        assert!(decode_index_payload(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
