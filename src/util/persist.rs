//! JSON文書のファイル置き換え書き込み。
use std::path::{Path, PathBuf};

/// `path` の隣の `.tmp` に書き出してからリネームで置き換える。
///
/// 親ディレクトリが無ければ作成する。
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await
}
