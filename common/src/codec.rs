//! On-disk format of intermediate data.
//!
//! Every record is one line, `base64(key) base64(value)\n`, using the URL-safe
//! alphabet. Encoding both halves means keys and values may hold spaces,
//! newlines or arbitrary bytes without breaking the line structure.

use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TaskError};
use crate::KeyValue;

const INTERMEDIATE_PREFIX: &str = "mr-";
const OUTPUT_PREFIX: &str = "mr-out-";

/// Name of the file carrying `map_id`'s output for `partition`.
pub fn intermediate_name(map_id: u32, partition: u32) -> String {
    format!("{INTERMEDIATE_PREFIX}{map_id}-{partition}")
}

/// Name of the final output file of `partition`.
pub fn output_name(partition: u32) -> String {
    format!("{OUTPUT_PREFIX}{partition}")
}

/// File name glob matching every intermediate file of `partition`.
///
/// This also matches unrelated names such as `mr-out-<partition>`; run the
/// results through [`parse_intermediate_name`].
pub fn intermediate_pattern(partition: u32) -> String {
    format!("{INTERMEDIATE_PREFIX}*-{partition}")
}

/// Split an intermediate file name into `(map_id, partition)`.
pub fn parse_intermediate_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix(INTERMEDIATE_PREFIX)?;
    let (map_id, partition) = rest.split_once('-')?;
    Some((map_id.parse().ok()?, partition.parse().ok()?))
}

/// Append one record to `buf`.
pub fn encode_record(kv: &KeyValue, buf: &mut BytesMut) {
    buf.put_slice(URL_SAFE.encode(&kv.key).as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(URL_SAFE.encode(&kv.value).as_bytes());
    buf.put_u8(b'\n');
}

/// Decode every record of an intermediate file. `path` is only used for
/// error reporting.
pub fn decode_records(path: &Path, data: &[u8]) -> Result<Vec<KeyValue>> {
    let corrupt = |line: usize, reason: String| TaskError::Corrupt {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut records = Vec::new();
    for (index, line) in data.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }

        let sep = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| corrupt(index + 1, "missing separator".into()))?;
        let (key, value) = (&line[..sep], &line[sep + 1..]);

        let key = URL_SAFE
            .decode(key)
            .map_err(|e| corrupt(index + 1, format!("bad key: {e}")))?;
        let value = URL_SAFE
            .decode(value)
            .map_err(|e| corrupt(index + 1, format!("bad value: {e}")))?;

        records.push(KeyValue::new(Bytes::from(key), Bytes::from(value)));
    }

    Ok(records)
}
