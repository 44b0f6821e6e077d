use std::fs;
use std::path::Path;

use bytes::BytesMut;
use tracing::{debug, info};

use common::codec::{encode_record, intermediate_name};
use common::error::Result;
use common::utils::write_replace;
use common::{partition_for, KeyValue, TaskError};

use crate::core::{MapTask, TaskContext};

/// Run the map function over one source and split its output into
/// `n_reduce` intermediate files.
///
/// All `n_reduce` files are written, empty or not, and each one replaces
/// whatever an earlier attempt of the same task left behind.
pub fn perform_map(task: &MapTask, ctx: &TaskContext) -> Result<()> {
    info!(
        "Starting map task {} over `{}` into {} partitions",
        task.map_id, task.source, task.n_reduce
    );

    let path = Path::new(&task.source);
    let content = fs::read(path).map_err(|source| TaskError::SourceRead {
        path: path.to_path_buf(),
        source,
    })?;

    let input = KeyValue::new(task.source.clone(), content);
    let output = (ctx.workload.map_fn)(input, ctx.aux.clone()).map_err(TaskError::Workload)?;

    let mut buckets = vec![BytesMut::new(); task.n_reduce as usize];
    let mut emitted = 0usize;
    for kv in output {
        let kv = kv.map_err(TaskError::Workload)?;
        let partition = partition_for(ctx.hash, &kv.key, task.n_reduce);
        encode_record(&kv, &mut buckets[partition as usize]);
        emitted += 1;
    }

    for (partition, bucket) in buckets.iter().enumerate() {
        let target = ctx
            .work_dir
            .join(intermediate_name(task.map_id, partition as u32));
        write_replace(&target, &ctx.tag, bucket).map_err(|source| TaskError::OutputWrite {
            path: target.clone(),
            source,
        })?;
        debug!("Wrote {} bytes to {:?}", bucket.len(), target);
    }

    info!("Map task {} emitted {emitted} records", task.map_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::anyhow;
    use bytes::Bytes;
    use tempfile::TempDir;

    use common::codec::decode_records;
    use common::{ihash, MapOutput, Workload};

    use super::*;

    fn context(dir: &TempDir, workload: Workload) -> TaskContext {
        TaskContext {
            workload,
            aux: Bytes::new(),
            work_dir: dir.path().to_path_buf(),
            hash: ihash,
            tag: "w1".into(),
        }
    }

    fn source(dir: &TempDir, name: &str, text: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn read_partition(dir: &TempDir, map_id: u32, partition: u32) -> Vec<KeyValue> {
        let path: PathBuf = dir.path().join(intermediate_name(map_id, partition));
        decode_records(&path, &fs::read(&path).unwrap()).unwrap()
    }

    #[test]
    fn records_land_in_their_hash_partition() {
        let dir = TempDir::new().unwrap();
        let task = MapTask {
            map_id: 3,
            source: source(&dir, "in.txt", "apple banana apple cherry date"),
            n_reduce: 4,
        };
        let ctx = context(&dir, workload::try_named("wc").unwrap());

        perform_map(&task, &ctx).unwrap();

        let mut total = 0;
        for partition in 0..4 {
            let records = read_partition(&dir, 3, partition);
            for kv in &records {
                assert_eq!(ihash(&kv.key) % 4, partition);
            }
            total += records.len();
        }
        assert_eq!(total, 5);

        // Emission order is kept inside a partition.
        let apple = ihash(b"apple") % 4;
        let apples = read_partition(&dir, 3, apple)
            .into_iter()
            .filter(|kv| kv.key == "apple")
            .count();
        assert_eq!(apples, 2);
    }

    #[test]
    fn partitioning_is_identical_across_attempts() {
        let dir = TempDir::new().unwrap();
        let task = MapTask {
            map_id: 0,
            source: source(&dir, "in.txt", "one two three four five six"),
            n_reduce: 3,
        };
        let ctx = context(&dir, workload::try_named("wc").unwrap());

        perform_map(&task, &ctx).unwrap();
        let first: Vec<_> = (0..3).map(|p| read_partition(&dir, 0, p)).collect();

        perform_map(&task, &ctx).unwrap();
        let second: Vec<_> = (0..3).map(|p| read_partition(&dir, 0, p)).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn retry_overwrites_previous_output() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join(intermediate_name(0, 0));
        fs::write(&stale, "garbage from a crashed attempt that is long\n").unwrap();

        let task = MapTask {
            map_id: 0,
            source: source(&dir, "in.txt", ""),
            n_reduce: 2,
        };
        perform_map(&task, &context(&dir, workload::try_named("wc").unwrap())).unwrap();

        assert!(fs::read(&stale).unwrap().is_empty());
        assert!(dir.path().join(intermediate_name(0, 1)).exists());
    }

    #[test]
    fn unreadable_source_fails_the_attempt() {
        let dir = TempDir::new().unwrap();
        let task = MapTask {
            map_id: 0,
            source: dir.path().join("nope").to_string_lossy().into_owned(),
            n_reduce: 1,
        };
        let err = perform_map(&task, &context(&dir, workload::try_named("wc").unwrap()))
            .unwrap_err();
        assert!(matches!(err, TaskError::SourceRead { .. }));
        assert!(!dir.path().join(intermediate_name(0, 0)).exists());
    }

    #[test]
    fn failing_map_function_fails_the_attempt() {
        fn broken(_: KeyValue, _: Bytes) -> MapOutput {
            Err(anyhow!("boom"))
        }
        let workload = Workload {
            map_fn: broken,
            reduce_fn: workload::wc::reduce,
        };

        let dir = TempDir::new().unwrap();
        let task = MapTask {
            map_id: 0,
            source: source(&dir, "in.txt", "x"),
            n_reduce: 1,
        };
        let err = perform_map(&task, &context(&dir, workload)).unwrap_err();
        assert!(matches!(err, TaskError::Workload(_)));
    }
}
