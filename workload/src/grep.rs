//! Distributed grep. The auxiliary argument is the pattern; every line
//! containing it is emitted together with the sources it appears in.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use itertools::Itertools;

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let pattern = string_from_bytes(aux)?;
    if pattern.is_empty() {
        return Err(anyhow!("grep needs a pattern"));
    }

    let source = kv.key;
    let text = string_from_bytes(kv.value)?;

    let matches = text
        .lines()
        .filter(|line| line.contains(&pattern))
        .map(|line| Ok(KeyValue::new(line.to_string(), source.clone())))
        .collect::<Vec<_>>();

    Ok(Box::new(matches.into_iter()))
}

pub fn reduce(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let sources = values
        .map(string_from_bytes)
        .collect::<Result<Vec<_>>>()?;

    Ok(Bytes::from(sources.into_iter().sorted().dedup().join(",")))
}
