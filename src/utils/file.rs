use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

pub fn get_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
}

/// 先写临时文件再 rename，读者不会看到写了一半的内容
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = tmp_sibling(path);
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
