use bytes::Bytes;
use std::fs::{self, File};
use std::io::{Error, ErrorKind, Read, Result};
use std::path::{Path, PathBuf};

use crate::protocol::FrameId;

/// Reads a whole file as one frame. Directories and empty files are refused.
pub fn read_frame<P: AsRef<Path>>(path: P) -> Result<Bytes> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a normal file", path.display()),
        ));
    }
    if metadata.len() == 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("{} is empty", path.display()),
        ));
    }

    let mut data = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut data)?;
    Ok(Bytes::from(data))
}

/// Returns `true` if `path` already existed as a directory; creates it
/// otherwise.
pub fn check_output_dir<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        if path.is_dir() {
            return Ok(true);
        } else {
            return Err(Error::other("The output path is not a directory!"));
        }
    }
    fs::create_dir_all(path)?;
    Ok(false)
}

/// Frames are named by delivery order first so a directory listing replays
/// them in the order they were shown, even across id wraparound.
pub fn frame_path(dir: &Path, sequence: u64, frame_id: FrameId) -> PathBuf {
    dir.join(format!("{sequence:08}-{frame_id:05}.bin"))
}

pub fn write_frame(dir: &Path, sequence: u64, frame_id: FrameId, data: &[u8]) -> Result<PathBuf> {
    let path = frame_path(dir, sequence, frame_id);
    fs::write(&path, data)?;
    Ok(path)
}
