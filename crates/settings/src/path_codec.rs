//! Stores paths as readable strings, with a `b64:` escape for non-UTF-8 paths.
//! 以可讀字串保存路徑；非 UTF-8 路徑改以 `b64:` 前綴的 base64 保存。

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

const B64_PREFIX: &str = "b64:";

/// `#[serde(with = "path_codec")]` helper for `Option<PathBuf>`.
pub fn serialize<S>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(path) => serializer.serialize_some(&encode(path)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) if text.is_empty() => Ok(None),
        Some(text) => decode(&text).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

pub(crate) fn encode(path: &Path) -> String {
    match path.to_str() {
        Some(text) => text.to_string(),
        None => format!("{B64_PREFIX}{}", BASE64.encode(path_bytes(path))),
    }
}

pub(crate) fn decode(text: &str) -> Result<PathBuf, String> {
    let Some(payload) = text.strip_prefix(B64_PREFIX) else {
        return Ok(PathBuf::from(text));
    };
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| format!("invalid base64 path payload: {err}"))?;
    path_from_bytes(bytes)
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(bytes)))
}

#[cfg(windows)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

#[cfg(windows)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    if bytes.len() % 2 != 0 {
        return Err("encoded Windows path has odd byte length".to_string());
    }
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(PathBuf::from(OsString::from_wide(&wide)))
}
