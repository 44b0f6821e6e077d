use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Interpret bytes as a UTF-8 string.
pub fn string_from_bytes(bytes: Bytes) -> anyhow::Result<String> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Replace the contents of `path` with `contents`.
///
/// The data goes to `<path>.<tag>.tmp` first and is renamed over `path`, so
/// readers see either the old file or the complete new one. Two attempts
/// writing the same file must use different tags.
pub fn write_replace(path: &Path, tag: &str, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path, tag);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path(path: &Path, tag: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{tag}.tmp"));
    path.with_file_name(name)
}
