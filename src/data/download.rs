use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use log::{info, warn};

use super::{DatasetErr, Result, Split, mnist};

/// Where the gzipped idx files are fetched from, tried in order.
pub const MIRRORS: [&str; 2] = [
    "https://ossci-datasets.s3.amazonaws.com/mnist/",
    "http://yann.lecun.com/exdb/mnist/",
];

/// The idx files every split needs.
fn files() -> impl Iterator<Item = &'static str> {
    [Split::Train, Split::Test]
        .into_iter()
        .flat_map(|split| {
            let (images, labels) = split.files();
            [images, labels]
        })
}

/// Whether every idx file is already present under `raw_dir`.
pub fn is_complete(raw_dir: &Path) -> bool {
    files().all(|file| raw_dir.join(file).is_file())
}

/// Makes sure the four MNIST idx files exist under `<data_dir>/MNIST/raw`, downloading and
/// decompressing the missing ones.
///
/// # Returns
/// The raw directory the files live in.
pub async fn ensure_downloaded(data_dir: &Path) -> Result<PathBuf> {
    let raw_dir = mnist::raw_dir(data_dir);
    fs::create_dir_all(&raw_dir).map_err(|source| DatasetErr::Io {
        path: raw_dir.clone(),
        source,
    })?;

    let client = reqwest::Client::new();
    for file in files() {
        let path = raw_dir.join(file);
        if path.is_file() {
            continue;
        }

        let bytes = fetch_any(&client, file).await?;
        write_atomically(&path, &bytes)?;
        info!("downloaded {}", path.display());
    }

    Ok(raw_dir)
}

/// Fetches `<file>.gz` from the first mirror that serves it and gunzips it.
async fn fetch_any(client: &reqwest::Client, file: &str) -> Result<Vec<u8>> {
    let mut last_err = None;

    for mirror in MIRRORS {
        let url = format!("{mirror}{file}.gz");
        info!("downloading {url}");

        match fetch(client, &url).await {
            Ok(bytes) => return gunzip(&url, &bytes),
            Err(e) => {
                warn!("{e}");
                last_err = Some(e);
            }
        }
    }

    // SAFETY: `MIRRORS` is not empty, so the loop either returned or set `last_err`.
    Err(last_err.unwrap())
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let to_err = |source| DatasetErr::Download {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(to_err)?;

    let bytes = response.bytes().await.map_err(to_err)?;
    Ok(bytes.to_vec())
}

fn gunzip(url: &str, gz: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    GzDecoder::new(gz)
        .read_to_end(&mut raw)
        .map_err(|source| DatasetErr::Decompress {
            url: url.to_string(),
            source,
        })?;

    Ok(raw)
}

/// Writes next to `path` and renames, so a crash never leaves a half written idx file behind.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("part");
    let to_err = |source| DatasetErr::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&tmp, bytes).map_err(to_err)?;
    fs::rename(&tmp, path).map_err(to_err)
}
