use std::fs;
use std::io;
use std::path::PathBuf;

use bytes::{BufMut, BytesMut};
use glob::{glob, Pattern};
use tracing::{debug, info};

use common::codec::{decode_records, intermediate_pattern, output_name, parse_intermediate_name};
use common::error::Result;
use common::utils::write_replace;
use common::{KeyValue, TaskError};

use crate::core::{ReduceTask, TaskContext};

/// Find the intermediate files of `task.partition`, ordered by map id.
///
/// Files left over from a previous job with more map tasks are ignored.
fn find_inputs(task: &ReduceTask, ctx: &TaskContext) -> Result<Vec<PathBuf>> {
    let dir = ctx.work_dir.to_string_lossy();
    let pattern = format!(
        "{}/{}",
        Pattern::escape(&dir),
        intermediate_pattern(task.partition)
    );

    let listing_error = |source: io::Error| TaskError::IntermediateRead {
        path: ctx.work_dir.clone(),
        source,
    };

    let paths = glob(&pattern)
        .map_err(|e| listing_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let mut inputs = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| listing_error(e.into_error()))?;
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        match parse_intermediate_name(name) {
            Some((map_id, partition)) if partition == task.partition && map_id < task.n_map => {
                inputs.push((map_id, path))
            }
            _ => debug!("Skipping {:?}", path),
        }
    }

    if inputs.len() != task.n_map as usize {
        return Err(TaskError::MissingIntermediate {
            partition: task.partition,
            expected: task.n_map,
            found: inputs.len() as u32,
        });
    }

    inputs.sort_by_key(|(map_id, _)| *map_id);
    Ok(inputs.into_iter().map(|(_, path)| path).collect())
}

/// Merge every intermediate file of one partition, group the records by key
/// and write one `<key> <result>` line per distinct key, in key order.
pub fn perform_reduce(task: &ReduceTask, ctx: &TaskContext) -> Result<()> {
    info!("Starting reduce task for partition {}", task.partition);

    let mut records: Vec<KeyValue> = Vec::new();
    for path in find_inputs(task, ctx)? {
        let data = fs::read(&path).map_err(|source| TaskError::IntermediateRead {
            path: path.clone(),
            source,
        })?;
        records.extend(decode_records(&path, &data)?);
    }

    // Stable, so equal keys keep the order they were read in.
    records.sort_by(|a, b| a.key.cmp(&b.key));

    let mut out = BytesMut::new();
    let mut groups = 0usize;
    for group in records.chunk_by(|a, b| a.key == b.key) {
        let key = group[0].key();
        let values = group.iter().map(KeyValue::value);

        let result = (ctx.workload.reduce_fn)(key.clone(), Box::new(values), ctx.aux.clone())
            .map_err(TaskError::Workload)?;

        out.put_slice(&key);
        out.put_u8(b' ');
        out.put_slice(&result);
        out.put_u8(b'\n');
        groups += 1;
    }

    let target = ctx.work_dir.join(output_name(task.partition));
    write_replace(&target, &ctx.tag, &out).map_err(|source| TaskError::OutputWrite {
        path: target.clone(),
        source,
    })?;

    info!(
        "Reduce task for partition {} wrote {groups} keys from {} records",
        task.partition,
        records.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use bytes::Bytes;
    use tempfile::TempDir;

    use common::codec::{encode_record, intermediate_name};
    use common::{ihash, Workload};

    use super::*;
    use crate::core::MapTask;
    use crate::map::perform_map;

    fn context(dir: &TempDir, workload: Workload) -> TaskContext {
        TaskContext {
            workload,
            aux: Bytes::new(),
            work_dir: dir.path().to_path_buf(),
            hash: ihash,
            tag: "w1".into(),
        }
    }

    fn write_intermediate(dir: &TempDir, map_id: u32, partition: u32, records: &[(&str, &str)]) {
        let mut buf = BytesMut::new();
        for (key, value) in records {
            encode_record(&KeyValue::new(key.to_string(), value.to_string()), &mut buf);
        }
        fs::write(dir.path().join(intermediate_name(map_id, partition)), buf).unwrap();
    }

    /// Joins the values it was given, to expose their order.
    fn concat(
        _key: Bytes,
        values: Box<dyn Iterator<Item = Bytes> + '_>,
        _aux: Bytes,
    ) -> anyhow::Result<Bytes> {
        let values: Vec<_> = values.map(|v| String::from_utf8_lossy(&v).into_owned()).collect();
        Ok(Bytes::from(values.join("+")))
    }

    fn concat_workload() -> Workload {
        Workload {
            map_fn: workload::wc::map,
            reduce_fn: concat,
        }
    }

    #[test]
    fn word_count_with_pinned_partitions() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, workload::try_named("wc").unwrap());
        ctx.hash = |key| if key == b"y" { 1 } else { 0 };

        for (map_id, (name, text)) in [("A", "x y x"), ("B", "y z")].into_iter().enumerate() {
            let path = dir.path().join(name);
            fs::write(&path, text).unwrap();
            let task = MapTask {
                map_id: map_id as u32,
                source: path.to_string_lossy().into_owned(),
                n_reduce: 2,
            };
            perform_map(&task, &ctx).unwrap();
        }

        for partition in 0..2 {
            perform_reduce(&ReduceTask { partition, n_map: 2 }, &ctx).unwrap();
        }

        assert_eq!(fs::read_to_string(dir.path().join("mr-out-0")).unwrap(), "x 2\nz 1\n");
        assert_eq!(fs::read_to_string(dir.path().join("mr-out-1")).unwrap(), "y 2\n");
    }

    #[test]
    fn groups_are_sorted_and_stable() {
        let dir = TempDir::new().unwrap();
        write_intermediate(&dir, 0, 0, &[("b", "1"), ("a", "2"), ("b", "3")]);
        write_intermediate(&dir, 1, 0, &[("a", "4"), ("c", "5"), ("b", "6")]);

        perform_reduce(&ReduceTask { partition: 0, n_map: 2 }, &context(&dir, concat_workload()))
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("mr-out-0")).unwrap(),
            "a 2+4\nb 1+3+6\nc 5\n"
        );
    }

    #[test]
    fn only_the_requested_partition_is_read() {
        let dir = TempDir::new().unwrap();
        write_intermediate(&dir, 0, 1, &[("k", "p1")]);
        write_intermediate(&dir, 0, 11, &[("k", "p11")]);
        // Left over from an older job with more map tasks.
        write_intermediate(&dir, 7, 1, &[("k", "stale")]);
        fs::write(dir.path().join("mr-out-1"), "k old\n").unwrap();

        perform_reduce(&ReduceTask { partition: 1, n_map: 1 }, &context(&dir, concat_workload()))
            .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("mr-out-1")).unwrap(), "k p1\n");
    }

    #[test]
    fn empty_partition_writes_empty_output() {
        let dir = TempDir::new().unwrap();
        write_intermediate(&dir, 0, 0, &[]);

        perform_reduce(&ReduceTask { partition: 0, n_map: 1 }, &context(&dir, concat_workload()))
            .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("mr-out-0")).unwrap(), "");
    }

    #[test]
    fn missing_map_output_fails_the_attempt() {
        let dir = TempDir::new().unwrap();
        write_intermediate(&dir, 0, 0, &[("a", "1")]);

        let err = perform_reduce(&ReduceTask { partition: 0, n_map: 2 }, &context(&dir, concat_workload()))
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::MissingIntermediate { expected: 2, found: 1, .. }
        ));
        assert!(!dir.path().join("mr-out-0").exists());
    }

    #[test]
    fn failing_reduce_function_fails_the_attempt() {
        fn broken(
            _key: Bytes,
            _values: Box<dyn Iterator<Item = Bytes> + '_>,
            _aux: Bytes,
        ) -> anyhow::Result<Bytes> {
            Err(anyhow!("boom"))
        }

        let dir = TempDir::new().unwrap();
        write_intermediate(&dir, 0, 0, &[("a", "1")]);
        let workload = Workload {
            map_fn: workload::wc::map,
            reduce_fn: broken,
        };

        let err = perform_reduce(&ReduceTask { partition: 0, n_map: 1 }, &context(&dir, workload))
            .unwrap_err();
        assert!(matches!(err, TaskError::Workload(_)));
    }
}
