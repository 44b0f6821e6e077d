//! Word count. A word is a maximal run of alphabetic characters.

use anyhow::Result;
use bytes::Bytes;

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

pub fn map(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let s = string_from_bytes(kv.value)?;

    let words = s
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| Ok(KeyValue::new(word.to_string(), "1")))
        .collect::<Vec<_>>();

    Ok(Box::new(words.into_iter()))
}

pub fn reduce(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut count = 0u64;

    for value in values {
        count += String::from_utf8(value.to_vec())?.parse::<u64>()?;
    }

    Ok(Bytes::from(count.to_string()))
}
